// crates/permgate-store/src/memory.rs
//
// In-memory implementation of the `RelationshipRepository` trait.
//
// Relationships are kept in insertion order under a monotonic sequence
// number. The sequence number doubles as the per-item continuation token,
// and a revision counter bumped on every write serves as the consistency
// token. Checks and lookups match direct relationships only: graph
// evaluation belongs to a real authorization backend.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use uuid::Uuid;

use permgate_core::context::OpContext;
use permgate_core::error::PermgateError;
use permgate_core::model::{
    CheckResult, Consistency, ConsistencyToken, ContinuationToken, LockToken, Permissionship,
    Relationship, RelationshipFilter, TouchSemantics,
};
use permgate_core::query::{
    CheckQuery, LookupResourcesQuery, LookupSubjectsQuery, ReadRelationshipsQuery,
    RelationshipResult, ResourceResult, SubjectResult,
};
use permgate_core::stream::ResultStream;
use permgate_core::traits::RelationshipRepository;

/// Default buffer size of the result channels this backend hands out.
const DEFAULT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Default)]
struct MemoryState {
    /// Relationships keyed by insertion sequence.
    relationships: BTreeMap<u64, Relationship>,
    next_seq: u64,
    /// Bumped once per successful write.
    revision: u64,
    /// Current fencing token per lock identifier.
    locks: HashMap<String, LockToken>,
}

impl MemoryState {
    fn token(&self) -> ConsistencyToken {
        ConsistencyToken::new(self.revision.to_string())
    }

    fn contains(&self, rel: &Relationship) -> bool {
        self.relationships.values().any(|existing| existing == rel)
    }

    fn check_consistency(&self, consistency: &Consistency) -> Result<(), PermgateError> {
        if let Consistency::AtLeastAsFresh(token) = consistency {
            let wanted: u64 = token.as_str().parse().map_err(|_| {
                PermgateError::InvalidArgument(format!("malformed consistency token {:?}", token.0))
            })?;
            if wanted > self.revision {
                return Err(PermgateError::FailedPrecondition(format!(
                    "consistency token {} is ahead of revision {}",
                    wanted, self.revision
                )));
            }
        }
        Ok(())
    }

    /// Matching relationships after `continuation`, in insertion order,
    /// capped at `limit` (0 = unbounded).
    fn select<T>(
        &self,
        limit: u32,
        continuation: Option<&ContinuationToken>,
        mut project: impl FnMut(&Relationship) -> Option<T>,
    ) -> Result<Vec<(u64, T)>, PermgateError> {
        let after = match continuation {
            Some(token) => Some(token.as_str().parse::<u64>().map_err(|_| {
                PermgateError::InvalidArgument(format!(
                    "malformed continuation token {:?}",
                    token.0
                ))
            })?),
            None => None,
        };
        let cap = if limit == 0 { usize::MAX } else { limit as usize };
        Ok(self
            .relationships
            .iter()
            .filter(|(seq, _)| after.map_or(true, |after| **seq > after))
            .filter_map(|(seq, rel)| project(rel).map(|item| (*seq, item)))
            .take(cap)
            .collect())
    }
}

/// Relationship backend held entirely in process memory.
#[derive(Debug)]
pub struct MemoryRepository {
    state: RwLock<MemoryState>,
    available: AtomicBool,
    channel_capacity: usize,
}

impl MemoryRepository {
    /// Create an empty, available backend.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            available: AtomicBool::new(true),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Set the buffer size of the result channels handed to consumers.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Mark the backend up or down. While down every operation fails with
    /// `Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of stored relationships.
    pub fn len(&self) -> usize {
        self.read().map(|s| s.relationships.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current revision, as carried in consistency tokens.
    pub fn revision(&self) -> u64 {
        self.read().map(|s| s.revision).unwrap_or(0)
    }

    fn ensure_available(&self) -> Result<(), PermgateError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PermgateError::Unavailable(
                "in-memory backend is marked unavailable".to_string(),
            ))
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>, PermgateError> {
        self.state
            .read()
            .map_err(|_| PermgateError::Internal("relationship store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>, PermgateError> {
        self.state
            .write()
            .map_err(|_| PermgateError::Internal("relationship store lock poisoned".to_string()))
    }

    /// Hand a precomputed snapshot to a producer task that streams it out
    /// until done, the consumer leaves, or the context is cancelled.
    fn stream_snapshot<T: Send + 'static>(&self, ctx: &OpContext, items: Vec<T>) -> ResultStream<T> {
        let (sink, stream) = ResultStream::channel(self.channel_capacity);
        let cancel = ctx.cancellation().clone();
        tokio::spawn(async move {
            for item in items {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::debug!("memory backend stream cancelled");
                        return;
                    }
                    delivered = sink.send(item) => {
                        if !delivered {
                            return;
                        }
                    }
                }
            }
            sink.finish();
        });
        stream
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelationshipRepository for MemoryRepository {
    async fn check(
        &self,
        _ctx: &OpContext,
        query: &CheckQuery,
    ) -> Result<CheckResult, PermgateError> {
        self.ensure_available()?;
        let state = self.read()?;
        state.check_consistency(&query.consistency)?;
        let found = state.relationships.values().any(|rel| {
            rel.resource == query.resource
                && rel.relation == query.permission
                && rel.subject == query.subject
        });
        Ok(CheckResult {
            permissionship: if found {
                Permissionship::HasPermission
            } else {
                Permissionship::NoPermission
            },
            checked_at: state.token(),
        })
    }

    async fn create_relationships(
        &self,
        _ctx: &OpContext,
        relationships: &[Relationship],
        touch: TouchSemantics,
    ) -> Result<ConsistencyToken, PermgateError> {
        self.ensure_available()?;
        for rel in relationships {
            rel.validate()?;
        }
        let mut state = self.write()?;
        if touch == TouchSemantics::Create {
            // A repeat within the batch conflicts the same as a stored one.
            let mut seen = HashSet::with_capacity(relationships.len());
            if let Some(existing) = relationships
                .iter()
                .find(|rel| state.contains(rel) || !seen.insert(*rel))
            {
                return Err(PermgateError::AlreadyExists(existing.to_string()));
            }
        }
        let mut written = 0usize;
        for rel in relationships {
            if state.contains(rel) {
                continue;
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.relationships.insert(seq, rel.clone());
            written += 1;
        }
        state.revision += 1;
        tracing::debug!(written, revision = state.revision, "relationships written");
        Ok(state.token())
    }

    async fn read_relationships(
        &self,
        ctx: &OpContext,
        query: &ReadRelationshipsQuery,
        limit: u32,
        continuation: Option<ContinuationToken>,
    ) -> Result<ResultStream<RelationshipResult>, PermgateError> {
        self.ensure_available()?;
        query.filter.validate()?;
        let state = self.read()?;
        state.check_consistency(&query.consistency)?;
        let read_at = state.token();
        let items = state
            .select(limit, continuation.as_ref(), |rel| {
                query.filter.matches(rel).then(|| rel.clone())
            })?
            .into_iter()
            .map(|(seq, relationship)| RelationshipResult {
                relationship,
                continuation_token: ContinuationToken::new(seq.to_string()),
                read_at: read_at.clone(),
            })
            .collect();
        drop(state);
        Ok(self.stream_snapshot(ctx, items))
    }

    async fn delete_relationships(
        &self,
        _ctx: &OpContext,
        filter: &RelationshipFilter,
    ) -> Result<ConsistencyToken, PermgateError> {
        self.ensure_available()?;
        filter.validate()?;
        let mut state = self.write()?;
        let before = state.relationships.len();
        state.relationships.retain(|_, rel| !filter.matches(rel));
        let deleted = before - state.relationships.len();
        state.revision += 1;
        tracing::debug!(deleted, revision = state.revision, "relationships deleted");
        Ok(state.token())
    }

    async fn lookup_subjects(
        &self,
        ctx: &OpContext,
        query: &LookupSubjectsQuery,
        limit: u32,
        continuation: Option<ContinuationToken>,
    ) -> Result<ResultStream<SubjectResult>, PermgateError> {
        self.ensure_available()?;
        let state = self.read()?;
        state.check_consistency(&query.consistency)?;
        let looked_up_at = state.token();
        let items = state
            .select(limit, continuation.as_ref(), |rel| {
                let hit = rel.resource == query.resource
                    && rel.relation == query.permission
                    && rel.subject.object.object_type == query.subject_type
                    && rel.subject.relation == query.subject_relation;
                hit.then(|| rel.subject.clone())
            })?
            .into_iter()
            .map(|(seq, subject)| SubjectResult {
                subject,
                continuation_token: ContinuationToken::new(seq.to_string()),
                looked_up_at: looked_up_at.clone(),
            })
            .collect();
        drop(state);
        Ok(self.stream_snapshot(ctx, items))
    }

    async fn lookup_resources(
        &self,
        ctx: &OpContext,
        query: &LookupResourcesQuery,
        limit: u32,
        continuation: Option<ContinuationToken>,
    ) -> Result<ResultStream<ResourceResult>, PermgateError> {
        self.ensure_available()?;
        let state = self.read()?;
        state.check_consistency(&query.consistency)?;
        let looked_up_at = state.token();
        let items = state
            .select(limit, continuation.as_ref(), |rel| {
                let hit = rel.resource.object_type == query.resource_type
                    && rel.relation == query.permission
                    && rel.subject == query.subject;
                hit.then(|| rel.resource.clone())
            })?
            .into_iter()
            .map(|(seq, resource)| ResourceResult {
                resource,
                continuation_token: ContinuationToken::new(seq.to_string()),
                looked_up_at: looked_up_at.clone(),
            })
            .collect();
        drop(state);
        Ok(self.stream_snapshot(ctx, items))
    }

    async fn acquire_lock(
        &self,
        _ctx: &OpContext,
        identifier: &str,
        existing: Option<&LockToken>,
    ) -> Result<LockToken, PermgateError> {
        self.ensure_available()?;
        if identifier.is_empty() {
            return Err(PermgateError::InvalidArgument(
                "lock identifier must not be empty".to_string(),
            ));
        }
        let mut state = self.write()?;
        // Without a token the caller takes over; with one it must still be
        // the current holder.
        if let (Some(presented), Some(current)) = (existing, state.locks.get(identifier)) {
            if presented != current {
                return Err(PermgateError::FailedPrecondition(format!(
                    "stale fencing token for lock {}",
                    identifier
                )));
            }
        }
        let token = LockToken::new(Uuid::now_v7().to_string());
        state.locks.insert(identifier.to_string(), token.clone());
        Ok(token)
    }

    async fn is_backend_available(&self, _ctx: &OpContext) -> Result<(), PermgateError> {
        self.ensure_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use permgate_core::model::{ObjectRef, SubjectRef};

    fn user(id: &str) -> SubjectRef {
        SubjectRef::new(ObjectRef::new("user", id))
    }

    fn viewer(doc: &str, who: &str) -> Relationship {
        Relationship::new(ObjectRef::new("document", doc), "viewer", user(who))
    }

    fn subjects_query(doc: &str) -> LookupSubjectsQuery {
        LookupSubjectsQuery {
            resource: ObjectRef::new("document", doc),
            permission: "viewer".to_string(),
            subject_type: "user".to_string(),
            subject_relation: None,
            consistency: Consistency::default(),
            pagination: None,
        }
    }

    async fn seeded() -> MemoryRepository {
        let repo = MemoryRepository::new();
        repo.create_relationships(
            &OpContext::new(),
            &[
                viewer("readme", "alice"),
                viewer("readme", "bob"),
                viewer("readme", "carol"),
                viewer("other", "dave"),
            ],
            TouchSemantics::Create,
        )
        .await
        .unwrap();
        repo
    }

    #[tokio::test]
    async fn test_lookup_subjects_in_insertion_order() {
        let repo = seeded().await;
        let stream = repo
            .lookup_subjects(&OpContext::new(), &subjects_query("readme"), 0, None)
            .await
            .unwrap();
        let ids: Vec<String> = stream
            .collect()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.subject.object.object_id)
            .collect();
        assert_eq!(ids, vec!["alice", "bob", "carol"]);
    }

    #[tokio::test]
    async fn test_lookup_limit_and_continuation() {
        let repo = seeded().await;
        let ctx = OpContext::new();
        let first = repo
            .lookup_subjects(&ctx, &subjects_query("readme"), 2, None)
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(first.len(), 2);

        let cursor = first[1].continuation_token.clone();
        let rest = repo
            .lookup_subjects(&ctx, &subjects_query("readme"), 2, Some(cursor))
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].subject, user("carol"));
    }

    #[tokio::test]
    async fn test_malformed_continuation_rejected() {
        let repo = seeded().await;
        let err = repo
            .lookup_subjects(
                &OpContext::new(),
                &subjects_query("readme"),
                0,
                Some(ContinuationToken::new("not-a-cursor")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PermgateError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_lookup_resources() {
        let repo = seeded().await;
        let query = LookupResourcesQuery {
            resource_type: "document".to_string(),
            permission: "viewer".to_string(),
            subject: user("dave"),
            consistency: Consistency::FullyConsistent,
            pagination: None,
        };
        let found = repo
            .lookup_resources(&OpContext::new(), &query, 0, None)
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].resource, ObjectRef::new("document", "other"));
    }

    #[tokio::test]
    async fn test_create_vs_touch() {
        let repo = seeded().await;
        let ctx = OpContext::new();
        let err = repo
            .create_relationships(&ctx, &[viewer("readme", "alice")], TouchSemantics::Create)
            .await
            .unwrap_err();
        assert!(matches!(err, PermgateError::AlreadyExists(_)));
        assert_eq!(repo.len(), 4);
        let before = repo.revision();

        repo.create_relationships(
            &ctx,
            &[viewer("readme", "alice"), viewer("readme", "erin")],
            TouchSemantics::Touch,
        )
        .await
        .unwrap();
        assert_eq!(repo.len(), 5);
        assert!(repo.revision() > before);
    }

    #[tokio::test]
    async fn test_create_rejects_repeat_within_batch() {
        let repo = seeded().await;
        let ctx = OpContext::new();
        let before = repo.revision();
        let err = repo
            .create_relationships(
                &ctx,
                &[viewer("notes", "frank"), viewer("notes", "frank")],
                TouchSemantics::Create,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PermgateError::AlreadyExists(_)));
        assert_eq!(repo.len(), 4);
        assert_eq!(repo.revision(), before);

        repo.create_relationships(
            &ctx,
            &[viewer("notes", "frank"), viewer("notes", "frank")],
            TouchSemantics::Touch,
        )
        .await
        .unwrap();
        assert_eq!(repo.len(), 5);
    }

    #[tokio::test]
    async fn test_check_and_delete() {
        let repo = seeded().await;
        let ctx = OpContext::new();
        let query = CheckQuery {
            resource: ObjectRef::new("document", "readme"),
            permission: "viewer".to_string(),
            subject: user("bob"),
            consistency: Consistency::default(),
        };
        assert!(repo.check(&ctx, &query).await.unwrap().allowed());

        let mut filter = RelationshipFilter::for_type("document");
        filter.subject_type = Some("user".to_string());
        filter.subject_id = Some("bob".to_string());
        let token = repo.delete_relationships(&ctx, &filter).await.unwrap();
        assert_eq!(token, ConsistencyToken::new("2"));

        let fresh = CheckQuery {
            consistency: Consistency::AtLeastAsFresh(token),
            ..query
        };
        assert!(!repo.check(&ctx, &fresh).await.unwrap().allowed());
    }

    #[tokio::test]
    async fn test_future_consistency_token_rejected() {
        let repo = seeded().await;
        let mut query = subjects_query("readme");
        query.consistency = Consistency::AtLeastAsFresh(ConsistencyToken::new("99"));
        let err = repo
            .lookup_subjects(&OpContext::new(), &query, 0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PermgateError::FailedPrecondition(_)));
    }

    #[tokio::test]
    async fn test_read_relationships_by_filter() {
        let repo = seeded().await;
        let mut filter = RelationshipFilter::for_type("document");
        filter.resource_id = Some("readme".to_string());
        let query = ReadRelationshipsQuery {
            filter,
            consistency: Consistency::default(),
            pagination: None,
        };
        let rels = repo
            .read_relationships(&OpContext::new(), &query, 0, None)
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(rels.len(), 3);
        assert!(rels.iter().all(|r| r.read_at == ConsistencyToken::new("1")));
    }

    #[tokio::test]
    async fn test_lock_fencing() {
        let repo = MemoryRepository::new();
        let ctx = OpContext::new();
        let first = repo.acquire_lock(&ctx, "job", None).await.unwrap();
        let renewed = repo.acquire_lock(&ctx, "job", Some(&first)).await.unwrap();
        assert_ne!(first, renewed);

        // A newer writer takes over; the old token is now stale.
        let takeover = repo.acquire_lock(&ctx, "job", None).await.unwrap();
        let err = repo
            .acquire_lock(&ctx, "job", Some(&renewed))
            .await
            .unwrap_err();
        assert!(matches!(err, PermgateError::FailedPrecondition(_)));
        assert!(repo.acquire_lock(&ctx, "job", Some(&takeover)).await.is_ok());
    }

    #[tokio::test]
    async fn test_unavailable_backend() {
        let repo = seeded().await;
        let ctx = OpContext::new();
        assert!(repo.is_backend_available(&ctx).await.is_ok());
        repo.set_available(false);
        assert!(matches!(
            repo.is_backend_available(&ctx).await,
            Err(PermgateError::Unavailable(_))
        ));
        assert!(repo
            .lookup_subjects(&ctx, &subjects_query("readme"), 0, None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_cancelled_stream_closes() {
        let repo = seeded().await.with_channel_capacity(1);
        let ctx = OpContext::new();
        let mut stream = repo
            .lookup_subjects(&ctx, &subjects_query("readme"), 0, None)
            .await
            .unwrap();
        assert!(stream.next().await.unwrap().is_ok());
        ctx.cancel();
        let drained = tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while let Some(item) = stream.next().await {
                item.unwrap();
            }
        })
        .await;
        assert!(drained.is_ok());
    }
}
