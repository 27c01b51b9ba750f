// crates/permgate-rpc/src/handlers/lock.rs
//
// AcquireLock: exchange a fencing token.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use permgate_core::error::PermgateError;
use permgate_core::model::LockToken;
use permgate_query::LockService;

use crate::error::CallError;
use crate::interceptors::Handler;
use crate::stream::{recv_request, send_json, Request, ServerStream, Validate};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquireLockRequest {
    pub identifier: String,
    /// The caller's last token for this lock, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_token: Option<LockToken>,
}

impl Validate for AcquireLockRequest {
    fn validate(&self) -> Result<(), PermgateError> {
        if self.identifier.trim().is_empty() {
            return Err(PermgateError::InvalidArgument(
                "lock identifier must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Request for AcquireLockRequest {
    fn validator(&self) -> Option<&dyn Validate> {
        Some(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquireLockResponse {
    pub token: LockToken,
}

pub struct AcquireLockHandler {
    locks: LockService,
}

impl AcquireLockHandler {
    pub fn new(locks: LockService) -> Self {
        Self { locks }
    }
}

#[async_trait]
impl Handler for AcquireLockHandler {
    async fn call(&self, stream: &mut dyn ServerStream) -> Result<(), CallError> {
        let request: AcquireLockRequest = recv_request(stream).await?;
        let ctx = stream.context().op_context();
        let token = self
            .locks
            .acquire(&ctx, &request.identifier, request.existing_token.as_ref())
            .await?;
        send_json(stream, &AcquireLockResponse { token }).await
    }
}
