// crates/permgate-query/src/readiness.rs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use permgate_core::context::OpContext;
use permgate_core::error::PermgateError;
use permgate_core::traits::RelationshipRepository;

/// Backend readiness check.
///
/// In sticky mode (the default) the first successful check is cached and
/// the backend is never asked again. With `sticky = false` every call goes
/// to the backend, so later outages show up as not-ready.
pub struct ReadinessProbe {
    repo: Arc<dyn RelationshipRepository>,
    sticky: bool,
    ready: AtomicBool,
}

impl ReadinessProbe {
    pub fn new(repo: Arc<dyn RelationshipRepository>, sticky: bool) -> Self {
        Self {
            repo,
            sticky,
            ready: AtomicBool::new(false),
        }
    }

    pub async fn check(&self, ctx: &OpContext) -> Result<(), PermgateError> {
        if self.sticky && self.ready.load(Ordering::Acquire) {
            return Ok(());
        }
        match self.repo.is_backend_available(ctx).await {
            Ok(()) => {
                if !self.ready.swap(true, Ordering::AcqRel) {
                    tracing::info!("backend became ready");
                }
                Ok(())
            }
            Err(err) => {
                self.ready.store(false, Ordering::Release);
                tracing::warn!(error = %err, "backend not ready");
                Err(err.context("backend not ready"))
            }
        }
    }

    /// Liveness never touches the backend.
    pub fn live(&self) -> Result<(), PermgateError> {
        Ok(())
    }
}
