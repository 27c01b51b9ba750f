// crates/permgate-core/src/context.rs
//
// Per-operation context handed to every repository call.

use tokio_util::sync::CancellationToken;

/// Cancellation scope for a single backend operation.
///
/// Cloning an `OpContext` shares the same cancellation token, so a
/// producer task spawned for a streaming lookup observes cancellation of
/// the call that started it.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    cancel: CancellationToken,
}

impl OpContext {
    /// Create a context with a fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context bound to an existing cancellation token.
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// The token that fires when the operation should stop.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the operation has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Derive a context that is cancelled with this one but can also be
    /// cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
        }
    }

    /// Cancel the operation and every child derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}
