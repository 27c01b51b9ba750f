// crates/permgate-query/src/lock.rs
//
// Fencing-token exchange. The backend owns the lock state; this usecase
// only enforces that a successful acquisition hands back a fresh token.

use std::sync::Arc;

use permgate_core::context::OpContext;
use permgate_core::error::PermgateError;
use permgate_core::model::LockToken;
use permgate_core::traits::RelationshipRepository;

#[derive(Clone)]
pub struct LockService {
    repo: Arc<dyn RelationshipRepository>,
}

impl LockService {
    pub fn new(repo: Arc<dyn RelationshipRepository>) -> Self {
        Self { repo }
    }

    /// Exchange `existing` for a new fencing token on `identifier`.
    ///
    /// Backend errors keep their kind and gain a "could not acquire lock"
    /// prefix.
    pub async fn acquire(
        &self,
        ctx: &OpContext,
        identifier: &str,
        existing: Option<&LockToken>,
    ) -> Result<LockToken, PermgateError> {
        if identifier.trim().is_empty() {
            return Err(PermgateError::InvalidArgument(
                "lock identifier must not be empty".to_string(),
            ));
        }

        let token = self
            .repo
            .acquire_lock(ctx, identifier, existing)
            .await
            .map_err(|e| e.context("could not acquire lock"))?;

        if existing == Some(&token) {
            tracing::error!(identifier, "backend returned the presented fencing token");
            return Err(PermgateError::Internal(
                "could not acquire lock: backend reissued the existing token".to_string(),
            ));
        }

        tracing::debug!(identifier, token = token.as_str(), "lock acquired");
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use permgate_core::model::{
        CheckResult, ConsistencyToken, ContinuationToken, Relationship, RelationshipFilter,
        TouchSemantics,
    };
    use permgate_core::query::{
        CheckQuery, LookupResourcesQuery, LookupSubjectsQuery, ReadRelationshipsQuery,
        RelationshipResult, ResourceResult, SubjectResult,
    };
    use permgate_core::stream::ResultStream;
    use permgate_store::MemoryRepository;

    /// Backend that hands the presented token straight back.
    struct EchoLockRepo;

    fn unsupported<T>() -> Result<T, PermgateError> {
        Err(PermgateError::Internal("unsupported".to_string()))
    }

    #[async_trait]
    impl RelationshipRepository for EchoLockRepo {
        async fn check(&self, _: &OpContext, _: &CheckQuery) -> Result<CheckResult, PermgateError> {
            unsupported()
        }

        async fn create_relationships(
            &self,
            _: &OpContext,
            _: &[Relationship],
            _: TouchSemantics,
        ) -> Result<ConsistencyToken, PermgateError> {
            unsupported()
        }

        async fn read_relationships(
            &self,
            _: &OpContext,
            _: &ReadRelationshipsQuery,
            _: u32,
            _: Option<ContinuationToken>,
        ) -> Result<ResultStream<RelationshipResult>, PermgateError> {
            unsupported()
        }

        async fn delete_relationships(
            &self,
            _: &OpContext,
            _: &RelationshipFilter,
        ) -> Result<ConsistencyToken, PermgateError> {
            unsupported()
        }

        async fn lookup_subjects(
            &self,
            _: &OpContext,
            _: &LookupSubjectsQuery,
            _: u32,
            _: Option<ContinuationToken>,
        ) -> Result<ResultStream<SubjectResult>, PermgateError> {
            unsupported()
        }

        async fn lookup_resources(
            &self,
            _: &OpContext,
            _: &LookupResourcesQuery,
            _: u32,
            _: Option<ContinuationToken>,
        ) -> Result<ResultStream<ResourceResult>, PermgateError> {
            unsupported()
        }

        async fn acquire_lock(
            &self,
            _: &OpContext,
            _: &str,
            existing: Option<&LockToken>,
        ) -> Result<LockToken, PermgateError> {
            Ok(existing.cloned().unwrap_or_else(|| LockToken::new("first")))
        }

        async fn is_backend_available(&self, _: &OpContext) -> Result<(), PermgateError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_successive_tokens_differ() {
        let locks = LockService::new(Arc::new(MemoryRepository::new()));
        let ctx = OpContext::new();
        let first = locks.acquire(&ctx, "migrations", None).await.unwrap();
        let second = locks.acquire(&ctx, "migrations", Some(&first)).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_stale_token_keeps_kind_and_gains_context() {
        let locks = LockService::new(Arc::new(MemoryRepository::new()));
        let ctx = OpContext::new();
        let first = locks.acquire(&ctx, "migrations", None).await.unwrap();
        // Another holder takes over.
        let _second = locks.acquire(&ctx, "migrations", None).await.unwrap();

        let err = locks
            .acquire(&ctx, "migrations", Some(&first))
            .await
            .unwrap_err();
        assert!(matches!(err, PermgateError::FailedPrecondition(_)));
        assert!(err.message().starts_with("could not acquire lock"));
    }

    #[tokio::test]
    async fn test_reissued_token_rejected() {
        let locks = LockService::new(Arc::new(EchoLockRepo));
        let ctx = OpContext::new();
        let first = locks.acquire(&ctx, "jobs", None).await.unwrap();
        let err = locks.acquire(&ctx, "jobs", Some(&first)).await.unwrap_err();
        assert!(matches!(err, PermgateError::Internal(_)));
    }

    #[tokio::test]
    async fn test_empty_identifier() {
        let locks = LockService::new(Arc::new(MemoryRepository::new()));
        let err = locks.acquire(&OpContext::new(), "  ", None).await.unwrap_err();
        assert!(matches!(err, PermgateError::InvalidArgument(_)));
    }
}
