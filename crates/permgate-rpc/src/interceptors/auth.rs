// crates/permgate-rpc/src/interceptors/auth.rs
//
// Bearer-token authentication for unary and streaming calls alike.
//
// The token comes from the `authorization` metadata entry. Verification
// checks the signing algorithm against the configured one before any key
// is resolved, then validates signature, expiry, and the optional
// issuer/audience. Verified claims are stored in the call context's
// extensions for the handler.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::CallError;
use crate::interceptors::{Interceptor, Next};
use crate::stream::ServerStream;

/// Metadata key carrying the bearer token.
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Picks the verification key for a token from its header (e.g. by `kid`).
pub type KeyResolver = Arc<dyn Fn(&Header) -> Result<DecodingKey, AuthError> + Send + Sync>;

/// Verified token claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: u64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("token expired")]
    TokenExpired,

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("unexpected signing method: expected {expected:?}, got {actual:?}")]
    UnexpectedSigningMethod {
        expected: Algorithm,
        actual: Algorithm,
    },

    #[error("invalid claims: {0}")]
    InvalidClaims(String),

    #[error("no verification key: {0}")]
    KeyUnavailable(String),
}

impl AuthError {
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing_token",
            AuthError::MalformedToken(_) => "malformed_token",
            AuthError::TokenExpired => "token_expired",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::UnexpectedSigningMethod { .. } => "unexpected_signing_method",
            AuthError::InvalidClaims(_) => "invalid_claims",
            AuthError::KeyUnavailable(_) => "key_unavailable",
        }
    }
}

impl From<AuthError> for CallError {
    fn from(err: AuthError) -> Self {
        CallError::unauthenticated(err.reason(), err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            ErrorKind::InvalidIssuer
            | ErrorKind::InvalidAudience
            | ErrorKind::ImmatureSignature
            | ErrorKind::MissingRequiredClaim(_) => AuthError::InvalidClaims(err.to_string()),
            _ => AuthError::MalformedToken(err.to_string()),
        }
    }
}

/// Verification settings.
#[derive(Clone)]
pub struct AuthConfig {
    pub algorithm: Algorithm,
    pub key_resolver: KeyResolver,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub leeway_secs: u64,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("leeway_secs", &self.leeway_secs)
            .finish()
    }
}

impl AuthConfig {
    pub fn new(algorithm: Algorithm, key_resolver: KeyResolver) -> Self {
        Self {
            algorithm,
            key_resolver,
            issuer: None,
            audience: None,
            leeway_secs: 0,
        }
    }

    /// HS256 with a single shared secret.
    pub fn hmac(secret: &[u8]) -> Self {
        Self::with_key(Algorithm::HS256, DecodingKey::from_secret(secret))
    }

    /// One fixed key for every token.
    pub fn with_key(algorithm: Algorithm, key: DecodingKey) -> Self {
        let resolver: KeyResolver =
            Arc::new(move |_: &Header| -> Result<DecodingKey, AuthError> { Ok(key.clone()) });
        Self::new(algorithm, resolver)
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn with_leeway(mut self, leeway_secs: u64) -> Self {
        self.leeway_secs = leeway_secs;
        self
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let header = jsonwebtoken::decode_header(token)?;
        if header.alg != self.algorithm {
            return Err(AuthError::UnexpectedSigningMethod {
                expected: self.algorithm,
                actual: header.alg,
            });
        }
        let key = (self.key_resolver)(&header)?;

        let mut validation = Validation::new(self.algorithm);
        validation.leeway = self.leeway_secs;
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer.as_str()]);
        }
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience.as_str()]),
            None => validation.validate_aud = false,
        }
        let data = jsonwebtoken::decode::<Claims>(token, &key, &validation)?;
        Ok(data.claims)
    }
}

/// Pull the token out of an `authorization` value of the form
/// `Bearer <token>`.
fn bearer_token(value: Option<&str>) -> Result<&str, AuthError> {
    let value = value.ok_or(AuthError::MissingToken)?;
    let (scheme, token) = value
        .split_once(' ')
        .ok_or_else(|| AuthError::MalformedToken("expected `Bearer <token>`".to_string()))?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::MalformedToken(format!(
            "unsupported authorization scheme: {}",
            scheme
        )));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    Ok(token)
}

pub struct AuthInterceptor {
    config: AuthConfig,
}

impl AuthInterceptor {
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Interceptor for AuthInterceptor {
    async fn intercept(
        &self,
        stream: &mut dyn ServerStream,
        next: Next<'_>,
    ) -> Result<(), CallError> {
        let verified = {
            let ctx = stream.context();
            bearer_token(ctx.metadata_str(AUTHORIZATION_HEADER))
                .and_then(|token| self.config.verify(token))
        };
        let claims = match verified {
            Ok(claims) => claims,
            Err(err) => {
                tracing::warn!(
                    method = stream.context().full_method(),
                    kind = %stream.context().kind(),
                    reason = err.reason(),
                    "rejected call"
                );
                return Err(err.into());
            }
        };
        tracing::debug!(subject = %claims.sub, "authenticated");
        stream.context_mut().extensions_mut().insert(claims);
        next.run(stream).await
    }
}
