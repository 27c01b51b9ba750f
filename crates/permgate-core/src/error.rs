// crates/permgate-core/src/error.rs

use thiserror::Error;

/// Protocol-wide error type for the permgate gateway.
///
/// The variant is the error's kind and survives [`PermgateError::context`]
/// annotation, so callers can classify a backend failure no matter how many
/// layers added context on the way up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermgateError {
    /// The request is malformed or violates a field constraint.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The referenced object or relationship does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A create-only write hit an existing relationship.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The backend state does not allow the operation (stale fencing token,
    /// consistency token from the future, ...).
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// The authorization backend cannot be reached.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The operation was cancelled before it completed.
    #[error("Canceled: {0}")]
    Canceled(String),

    /// Any other failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PermgateError {
    /// Prefix the message with `ctx`, keeping the kind.
    pub fn context(self, ctx: impl AsRef<str>) -> Self {
        let ctx = ctx.as_ref();
        match self {
            PermgateError::InvalidArgument(m) => {
                PermgateError::InvalidArgument(format!("{}: {}", ctx, m))
            }
            PermgateError::NotFound(m) => PermgateError::NotFound(format!("{}: {}", ctx, m)),
            PermgateError::AlreadyExists(m) => {
                PermgateError::AlreadyExists(format!("{}: {}", ctx, m))
            }
            PermgateError::FailedPrecondition(m) => {
                PermgateError::FailedPrecondition(format!("{}: {}", ctx, m))
            }
            PermgateError::Unavailable(m) => PermgateError::Unavailable(format!("{}: {}", ctx, m)),
            PermgateError::Canceled(m) => PermgateError::Canceled(format!("{}: {}", ctx, m)),
            PermgateError::Internal(m) => PermgateError::Internal(format!("{}: {}", ctx, m)),
        }
    }

    /// The bare message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            PermgateError::InvalidArgument(m)
            | PermgateError::NotFound(m)
            | PermgateError::AlreadyExists(m)
            | PermgateError::FailedPrecondition(m)
            | PermgateError::Unavailable(m)
            | PermgateError::Canceled(m)
            | PermgateError::Internal(m) => m,
        }
    }
}

impl From<serde_json::Error> for PermgateError {
    fn from(e: serde_json::Error) -> Self {
        PermgateError::InvalidArgument(e.to_string())
    }
}
