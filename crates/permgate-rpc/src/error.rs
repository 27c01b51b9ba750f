// crates/permgate-rpc/src/error.rs
//
// The error every call ends with when it fails: a transport code, a stable
// machine-readable reason, and a human-readable message.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tonic::Code;

use permgate_core::error::PermgateError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}: {message}")]
pub struct CallError {
    pub code: Code,
    pub reason: String,
    pub message: String,
}

impl CallError {
    pub fn new(code: Code, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// Client error with the `bad_request` reason.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, "bad_request", message)
    }

    pub fn unauthenticated(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Code::Unauthenticated, reason, message)
    }

    pub fn internal(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Code::Internal, reason, message)
    }

    pub fn canceled(message: impl Into<String>) -> Self {
        Self::new(Code::Cancelled, "canceled", message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(Code::DeadlineExceeded, "deadline_exceeded", message)
    }

    pub fn unknown_method(method: &str) -> Self {
        Self::new(
            Code::Unimplemented,
            "unknown_method",
            format!("no such method: {}", method),
        )
    }

    /// Lowercase code label, as used on the wire and in metrics.
    pub fn code_label(&self) -> &'static str {
        code_label(self.code)
    }
}

impl From<PermgateError> for CallError {
    fn from(err: PermgateError) -> Self {
        let (code, reason) = match &err {
            PermgateError::InvalidArgument(_) => (Code::InvalidArgument, "invalid_argument"),
            PermgateError::NotFound(_) => (Code::NotFound, "not_found"),
            PermgateError::AlreadyExists(_) => (Code::AlreadyExists, "already_exists"),
            PermgateError::FailedPrecondition(_) => {
                (Code::FailedPrecondition, "failed_precondition")
            }
            PermgateError::Unavailable(_) => (Code::Unavailable, "backend_unavailable"),
            PermgateError::Canceled(_) => (Code::Cancelled, "canceled"),
            PermgateError::Internal(_) => (Code::Internal, "internal"),
        };
        Self::new(code, reason, err.message())
    }
}

/// `code_label` for a bare code.
pub fn code_label(code: Code) -> &'static str {
    match code {
        Code::Ok => "ok",
        Code::Cancelled => "canceled",
        Code::Unknown => "unknown",
        Code::InvalidArgument => "invalid_argument",
        Code::DeadlineExceeded => "deadline_exceeded",
        Code::NotFound => "not_found",
        Code::AlreadyExists => "already_exists",
        Code::PermissionDenied => "permission_denied",
        Code::ResourceExhausted => "resource_exhausted",
        Code::FailedPrecondition => "failed_precondition",
        Code::Aborted => "aborted",
        Code::OutOfRange => "out_of_range",
        Code::Unimplemented => "unimplemented",
        Code::Internal => "internal",
        Code::Unavailable => "unavailable",
        Code::DataLoss => "data_loss",
        Code::Unauthenticated => "unauthenticated",
    }
}

/// Error object in a JSON-RPC response or terminal stream frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: String,
    pub reason: String,
    pub message: String,
}

impl From<&CallError> for WireError {
    fn from(err: &CallError) -> Self {
        Self {
            code: err.code_label().to_string(),
            reason: err.reason.clone(),
            message: err.message.clone(),
        }
    }
}
