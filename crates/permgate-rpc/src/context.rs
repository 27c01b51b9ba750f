// crates/permgate-rpc/src/context.rs
//
// Per-call context: kind, full method name, inbound metadata, cancellation,
// a trace id, and typed extensions that interceptors use to hand values
// (e.g. verified token claims) to the handler.

use std::fmt;

use http::{Extensions, HeaderMap};
use tokio_util::sync::CancellationToken;

use permgate_core::context::OpContext;

/// Shape of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Unary,
    ServerStreaming,
}

impl CallKind {
    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            CallKind::Unary => "unary",
            CallKind::ServerStreaming => "server_streaming",
        }
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct CallContext {
    kind: CallKind,
    full_method: String,
    metadata: HeaderMap,
    cancel: CancellationToken,
    trace_id: Option<String>,
    extensions: Extensions,
}

impl CallContext {
    pub fn new(kind: CallKind, full_method: impl Into<String>) -> Self {
        Self {
            kind,
            full_method: full_method.into(),
            metadata: HeaderMap::new(),
            cancel: CancellationToken::new(),
            trace_id: None,
            extensions: Extensions::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: HeaderMap) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn kind(&self) -> CallKind {
        self.kind
    }

    /// e.g. `permgate.v1.PermissionsService/Check`.
    pub fn full_method(&self) -> &str {
        &self.full_method
    }

    pub fn metadata(&self) -> &HeaderMap {
        &self.metadata
    }

    /// A metadata entry as UTF-8, if present and non-empty.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Repository-facing context sharing this call's cancellation.
    pub fn op_context(&self) -> OpContext {
        OpContext::with_cancellation(self.cancel.clone())
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn set_trace_id(&mut self, trace_id: impl Into<String>) {
        self.trace_id = Some(trace_id.into());
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_str() {
        let mut headers = HeaderMap::new();
        headers.insert("x-trace-id", "abc".parse().unwrap());
        headers.insert("authorization", "  ".parse().unwrap());
        let ctx = CallContext::new(CallKind::Unary, "permgate.v1.PermissionsService/Check")
            .with_metadata(headers);

        assert_eq!(ctx.full_method(), "permgate.v1.PermissionsService/Check");
        assert_eq!(ctx.metadata_str("x-trace-id"), Some("abc"));
        assert_eq!(ctx.metadata_str("authorization"), None);
        assert_eq!(ctx.metadata_str("missing"), None);
    }

    #[test]
    fn test_op_context_shares_cancellation() {
        let ctx = CallContext::new(CallKind::ServerStreaming, "x/y");
        let op = ctx.op_context();
        assert!(!op.is_cancelled());
        ctx.cancellation().cancel();
        assert!(op.is_cancelled());
        assert_eq!(ctx.kind().to_string(), "server_streaming");
    }
}
