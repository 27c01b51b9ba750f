// crates/permgate-daemon/src/config.rs
//
// Runtime configuration for the permgate daemon.
// Loaded from a TOML file or populated with defaults.

use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;

use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use thiserror::Error;

use permgate_query::{EngineConfig, LimitPolicy, DEFAULT_MAX_LOOKUP_LIMIT};
use permgate_rpc::interceptors::AuthConfig;
use permgate_rpc::RpcConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unknown signing algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("auth is enabled but {0} is not set")]
    MissingKey(&'static str),

    #[error("invalid verification key: {0}")]
    Key(#[from] jsonwebtoken::errors::Error),

    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Runtime configuration for the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Host address for the RPC server.
    #[serde(default = "default_rpc_host")]
    pub rpc_host: String,

    /// Port for the RPC server.
    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,

    /// Log level: "trace", "debug", "info", "warn", "error".
    /// `RUST_LOG` takes precedence when set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Upper bound on a single call in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub lookup: LookupSection,

    #[serde(default)]
    pub auth: AuthSection,

    #[serde(default)]
    pub readiness: ReadinessSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LookupSection {
    /// Ceiling applied to every lookup limit.
    #[serde(default = "default_max_limit")]
    pub max_limit: u32,

    /// Buffer between a lookup's producer and the response stream.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Bearer-token verification. Disabled unless `enabled = true`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSection {
    #[serde(default)]
    pub enabled: bool,

    /// JWT algorithm name, e.g. "HS256", "RS256", "ES256", "EdDSA".
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// Shared secret for HS* algorithms.
    #[serde(default)]
    pub hmac_secret: Option<String>,

    /// PEM public key for asymmetric algorithms.
    #[serde(default)]
    pub public_key_path: Option<String>,

    #[serde(default)]
    pub issuer: Option<String>,

    #[serde(default)]
    pub audience: Option<String>,

    /// Clock skew tolerated on `exp`, in seconds.
    #[serde(default)]
    pub leeway_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadinessSection {
    /// Once the backend has answered, keep reporting ready.
    #[serde(default = "default_sticky")]
    pub sticky: bool,
}

fn default_rpc_host() -> String {
    "127.0.0.1".to_string()
}

fn default_rpc_port() -> u16 {
    50051
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_max_limit() -> u32 {
    DEFAULT_MAX_LOOKUP_LIMIT
}

fn default_channel_capacity() -> usize {
    32
}

fn default_algorithm() -> String {
    "HS256".to_string()
}

fn default_sticky() -> bool {
    true
}

impl Default for LookupSection {
    fn default() -> Self {
        Self {
            max_limit: default_max_limit(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            enabled: false,
            algorithm: default_algorithm(),
            hmac_secret: None,
            public_key_path: None,
            issuer: None,
            audience: None,
            leeway_secs: 0,
        }
    }
}

impl Default for ReadinessSection {
    fn default() -> Self {
        Self {
            sticky: default_sticky(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            rpc_host: default_rpc_host(),
            rpc_port: default_rpc_port(),
            log_level: default_log_level(),
            request_timeout_ms: default_request_timeout_ms(),
            lookup: LookupSection::default(),
            auth: AuthSection::default(),
            readiness: ReadinessSection::default(),
        }
    }
}

impl FromStr for DaemonConfig {
    type Err = ConfigError;

    fn from_str(contents: &str) -> Result<Self, Self::Err> {
        let config: DaemonConfig = toml::from_str(contents)?;
        config.check()?;
        Ok(config)
    }
}

impl DaemonConfig {
    /// Load configuration from a TOML file at the given path.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        contents.parse()
    }

    /// Like `load`, but a missing file is `Ok(None)`. A file that exists
    /// and does not parse is still an error.
    pub fn load_optional(path: &str) -> Result<Option<Self>, ConfigError> {
        if !Path::new(path).exists() {
            return Ok(None);
        }
        Self::load(path).map(Some)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.lookup.max_limit == 0 {
            return Err(ConfigError::Invalid(
                "lookup.max_limit must be greater than zero".to_string(),
            ));
        }
        if self.lookup.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "lookup.channel_capacity must be greater than zero".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn rpc_config(&self) -> RpcConfig {
        RpcConfig {
            host: self.rpc_host.clone(),
            port: self.rpc_port,
            request_timeout_ms: self.request_timeout_ms,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            limits: LimitPolicy::new(self.lookup.max_limit),
            channel_capacity: self.lookup.channel_capacity,
        }
    }

    /// Verification settings, or `None` when auth is disabled.
    pub fn auth_config(&self) -> Result<Option<AuthConfig>, ConfigError> {
        let auth = &self.auth;
        if !auth.enabled {
            return Ok(None);
        }

        let algorithm = Algorithm::from_str(&auth.algorithm)
            .map_err(|_| ConfigError::UnknownAlgorithm(auth.algorithm.clone()))?;
        let key = match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                let secret = auth
                    .hmac_secret
                    .as_deref()
                    .ok_or(ConfigError::MissingKey("auth.hmac_secret"))?;
                DecodingKey::from_secret(secret.as_bytes())
            }
            _ => {
                let path = auth
                    .public_key_path
                    .as_deref()
                    .ok_or(ConfigError::MissingKey("auth.public_key_path"))?;
                let pem = fs::read(path).map_err(|source| ConfigError::Read {
                    path: path.to_string(),
                    source,
                })?;
                decoding_key_from_pem(algorithm, &pem)?
            }
        };

        let mut config = AuthConfig::with_key(algorithm, key).with_leeway(auth.leeway_secs);
        if let Some(issuer) = &auth.issuer {
            config = config.with_issuer(issuer.clone());
        }
        if let Some(audience) = &auth.audience {
            config = config.with_audience(audience.clone());
        }
        Ok(Some(config))
    }
}

fn decoding_key_from_pem(algorithm: Algorithm, pem: &[u8]) -> Result<DecodingKey, ConfigError> {
    let key = match algorithm {
        Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(pem)?,
        Algorithm::EdDSA => DecodingKey::from_ed_pem(pem)?,
        _ => DecodingKey::from_rsa_pem(pem)?,
    };
    Ok(key)
}
