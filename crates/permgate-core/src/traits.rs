// crates/permgate-core/src/traits.rs

use async_trait::async_trait;

use crate::context::OpContext;
use crate::error::PermgateError;
use crate::model::{
    CheckResult, ConsistencyToken, ContinuationToken, LockToken, Relationship, RelationshipFilter,
    TouchSemantics,
};
use crate::query::{
    CheckQuery, LookupResourcesQuery, LookupSubjectsQuery, ReadRelationshipsQuery,
    RelationshipResult, ResourceResult, SubjectResult,
};
use crate::stream::ResultStream;

/// Contract with the relationship-graph authorization backend.
///
/// Implemented by permgate-store (in-memory backend) and by any client for
/// an external backend. Implementations are shared by every concurrent call
/// and must not carry per-call mutable state.
///
/// Streaming operations return a [`ResultStream`]; an `Err` from the call
/// itself means the request was rejected before any production started.
/// For the streaming operations the explicit `limit` (0 = unbounded) and
/// `continuation` arguments are authoritative; the `pagination` block on
/// the query is ignored.
#[async_trait]
pub trait RelationshipRepository: Send + Sync {
    /// Evaluate a single permission check.
    async fn check(&self, ctx: &OpContext, query: &CheckQuery)
        -> Result<CheckResult, PermgateError>;

    /// Write relationships. Returns the token of the write.
    async fn create_relationships(
        &self,
        ctx: &OpContext,
        relationships: &[Relationship],
        touch: TouchSemantics,
    ) -> Result<ConsistencyToken, PermgateError>;

    /// Stream the relationships selected by the query's filter.
    async fn read_relationships(
        &self,
        ctx: &OpContext,
        query: &ReadRelationshipsQuery,
        limit: u32,
        continuation: Option<ContinuationToken>,
    ) -> Result<ResultStream<RelationshipResult>, PermgateError>;

    /// Delete every relationship matching `filter`. Returns the token of
    /// the delete.
    async fn delete_relationships(
        &self,
        ctx: &OpContext,
        filter: &RelationshipFilter,
    ) -> Result<ConsistencyToken, PermgateError>;

    /// Stream the subjects that hold the queried permission.
    async fn lookup_subjects(
        &self,
        ctx: &OpContext,
        query: &LookupSubjectsQuery,
        limit: u32,
        continuation: Option<ContinuationToken>,
    ) -> Result<ResultStream<SubjectResult>, PermgateError>;

    /// Stream the resources on which the subject holds the queried
    /// permission.
    async fn lookup_resources(
        &self,
        ctx: &OpContext,
        query: &LookupResourcesQuery,
        limit: u32,
        continuation: Option<ContinuationToken>,
    ) -> Result<ResultStream<ResourceResult>, PermgateError>;

    /// Exchange `existing` (the caller's last fencing token, if any) for a
    /// new one. Fails if another holder has taken the lock since.
    async fn acquire_lock(
        &self,
        ctx: &OpContext,
        identifier: &str,
        existing: Option<&LockToken>,
    ) -> Result<LockToken, PermgateError>;

    /// `Ok(())` when the backend can serve requests.
    async fn is_backend_available(&self, ctx: &OpContext) -> Result<(), PermgateError>;
}
