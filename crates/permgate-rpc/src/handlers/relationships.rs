// crates/permgate-rpc/src/handlers/relationships.rs
//
// Relationship writes (Create, Delete) and the ReadRelationships stream.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use permgate_core::error::PermgateError;
use permgate_core::model::{ConsistencyToken, Relationship, RelationshipFilter, TouchSemantics};
use permgate_core::query::ReadRelationshipsQuery;
use permgate_core::traits::RelationshipRepository;
use permgate_query::LookupEngine;

use crate::error::CallError;
use crate::handlers::forward_lookup;
use crate::interceptors::Handler;
use crate::stream::{recv_request, send_json, Request, ServerStream, Validate};

/// Largest batch accepted by one CreateRelationships call.
pub const MAX_RELATIONSHIPS_PER_WRITE: usize = 1000;

// ---------------------------------------------------------------------------
// CreateRelationships
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRelationshipsRequest {
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub touch: TouchSemantics,
}

impl Validate for CreateRelationshipsRequest {
    fn validate(&self) -> Result<(), PermgateError> {
        if self.relationships.is_empty() {
            return Err(PermgateError::InvalidArgument(
                "at least one relationship is required".to_string(),
            ));
        }
        if self.relationships.len() > MAX_RELATIONSHIPS_PER_WRITE {
            return Err(PermgateError::InvalidArgument(format!(
                "at most {} relationships per write, got {}",
                MAX_RELATIONSHIPS_PER_WRITE,
                self.relationships.len()
            )));
        }
        self.relationships.iter().try_for_each(Relationship::validate)
    }
}

impl Request for CreateRelationshipsRequest {
    fn validator(&self) -> Option<&dyn Validate> {
        Some(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRelationshipsResponse {
    pub written_at: ConsistencyToken,
}

pub struct CreateRelationshipsHandler {
    repo: Arc<dyn RelationshipRepository>,
}

impl CreateRelationshipsHandler {
    pub fn new(repo: Arc<dyn RelationshipRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl Handler for CreateRelationshipsHandler {
    async fn call(&self, stream: &mut dyn ServerStream) -> Result<(), CallError> {
        let request: CreateRelationshipsRequest = recv_request(stream).await?;
        let ctx = stream.context().op_context();
        let written_at = self
            .repo
            .create_relationships(&ctx, &request.relationships, request.touch)
            .await
            .map_err(|e| e.context("CreateRelationships"))?;
        tracing::debug!(
            count = request.relationships.len(),
            token = written_at.as_str(),
            "relationships written"
        );
        send_json(stream, &CreateRelationshipsResponse { written_at }).await
    }
}

// ---------------------------------------------------------------------------
// DeleteRelationships
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRelationshipsRequest {
    pub filter: RelationshipFilter,
}

impl Validate for DeleteRelationshipsRequest {
    fn validate(&self) -> Result<(), PermgateError> {
        self.filter.validate()
    }
}

impl Request for DeleteRelationshipsRequest {
    fn validator(&self) -> Option<&dyn Validate> {
        Some(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRelationshipsResponse {
    pub deleted_at: ConsistencyToken,
}

pub struct DeleteRelationshipsHandler {
    repo: Arc<dyn RelationshipRepository>,
}

impl DeleteRelationshipsHandler {
    pub fn new(repo: Arc<dyn RelationshipRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl Handler for DeleteRelationshipsHandler {
    async fn call(&self, stream: &mut dyn ServerStream) -> Result<(), CallError> {
        let request: DeleteRelationshipsRequest = recv_request(stream).await?;
        let ctx = stream.context().op_context();
        let deleted_at = self
            .repo
            .delete_relationships(&ctx, &request.filter)
            .await
            .map_err(|e| e.context("DeleteRelationships"))?;
        send_json(stream, &DeleteRelationshipsResponse { deleted_at }).await
    }
}

// ---------------------------------------------------------------------------
// ReadRelationships
// ---------------------------------------------------------------------------

pub struct ReadRelationshipsHandler {
    engine: LookupEngine,
}

impl ReadRelationshipsHandler {
    pub fn new(engine: LookupEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Handler for ReadRelationshipsHandler {
    async fn call(&self, stream: &mut dyn ServerStream) -> Result<(), CallError> {
        let query: ReadRelationshipsQuery = recv_request(stream).await?;
        let ctx = stream.context().op_context();
        let lookup = self.engine.read_relationships(&ctx, query)?;
        forward_lookup(stream, lookup).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use permgate_core::model::{ObjectRef, SubjectRef};

    fn rel(id: &str) -> Relationship {
        Relationship::new(
            ObjectRef::new("document", id),
            "viewer",
            SubjectRef::new(ObjectRef::new("user", "alice")),
        )
    }

    #[test]
    fn test_create_request_validation() {
        let empty = CreateRelationshipsRequest {
            relationships: vec![],
            touch: TouchSemantics::Create,
        };
        assert!(empty.validate().is_err());

        let ok = CreateRelationshipsRequest {
            relationships: vec![rel("a"), rel("b")],
            touch: TouchSemantics::Touch,
        };
        assert!(ok.validate().is_ok());

        let bad = CreateRelationshipsRequest {
            relationships: vec![rel("a"), rel("")],
            touch: TouchSemantics::Create,
        };
        assert!(matches!(bad.validate(), Err(PermgateError::InvalidArgument(_))));
    }

    #[test]
    fn test_touch_defaults_to_create() {
        let request: CreateRelationshipsRequest = serde_json::from_value(serde_json::json!({
            "relationships": [rel("a")],
        }))
        .unwrap();
        assert_eq!(request.touch, TouchSemantics::Create);
    }
}
