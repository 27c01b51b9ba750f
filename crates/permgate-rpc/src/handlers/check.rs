// crates/permgate-rpc/src/handlers/check.rs
//
// Check: evaluate one permission for one subject on one resource.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use permgate_core::model::{ConsistencyToken, Permissionship};
use permgate_core::query::CheckQuery;
use permgate_core::traits::RelationshipRepository;

use crate::error::CallError;
use crate::interceptors::auth::Claims;
use crate::interceptors::Handler;
use crate::stream::{recv_request, send_json, ServerStream};

/// Response to a Check request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResponse {
    pub permissionship: Permissionship,
    pub allowed: bool,
    pub checked_at: ConsistencyToken,
}

pub struct CheckHandler {
    repo: Arc<dyn RelationshipRepository>,
}

impl CheckHandler {
    pub fn new(repo: Arc<dyn RelationshipRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl Handler for CheckHandler {
    async fn call(&self, stream: &mut dyn ServerStream) -> Result<(), CallError> {
        let query: CheckQuery = recv_request(stream).await?;
        let ctx = stream.context().op_context();
        if let Some(claims) = stream.context().extensions().get::<Claims>() {
            tracing::debug!(caller = %claims.sub, resource = %query.resource, "check");
        }

        let result = self
            .repo
            .check(&ctx, &query)
            .await
            .map_err(|e| e.context("Check"))?;

        let response = CheckResponse {
            allowed: result.allowed(),
            permissionship: result.permissionship,
            checked_at: result.checked_at,
        };
        send_json(stream, &response).await
    }
}
