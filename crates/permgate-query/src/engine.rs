// crates/permgate-query/src/engine.rs
//
// Streaming lookup engine.
//
// Each lookup resolves its limit synchronously, then spawns one producer
// task that opens the repository stream and relays items to the caller's
// result channel until one of:
//   Completed - the repository stream ended, or the limit was reached
//   Failed    - the repository reported an error (relayed exactly once)
//   Canceled  - the call context fired or the consumer went away
// The producer always drops its sink on exit, closing both channels, and
// cancels the repository's context so the backend stops producing too.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;

use permgate_core::context::OpContext;
use permgate_core::error::PermgateError;
use permgate_core::query::{
    LookupResourcesQuery, LookupSubjectsQuery, ReadRelationshipsQuery, RelationshipResult,
    ResourceResult, SubjectResult,
};
use permgate_core::stream::{ResultSink, ResultStream};
use permgate_core::traits::RelationshipRepository;

use crate::limits::{LimitPolicy, LookupLimit};

/// Default buffer between producer and consumer.
const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// Lifecycle of one lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupState {
    Created,
    Producing,
    Completed,
    Failed,
    Canceled,
}

impl LookupState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LookupState::Completed | LookupState::Failed | LookupState::Canceled
        )
    }
}

impl fmt::Display for LookupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupState::Created => write!(f, "Created"),
            LookupState::Producing => write!(f, "Producing"),
            LookupState::Completed => write!(f, "Completed"),
            LookupState::Failed => write!(f, "Failed"),
            LookupState::Canceled => write!(f, "Canceled"),
        }
    }
}

/// Engine settings.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub limits: LimitPolicy,
    /// Result channel buffer; small values keep a stalled consumer from
    /// letting the producer run far ahead.
    pub channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            limits: LimitPolicy::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// A running lookup: its resolved limit, the consumer side of its
/// channels, and the producer task.
#[derive(Debug)]
pub struct Lookup<T> {
    limit: LookupLimit,
    stream: ResultStream<T>,
    producer: JoinHandle<LookupState>,
}

impl<T> Lookup<T> {
    /// The limit resolved for this lookup.
    pub fn limit(&self) -> LookupLimit {
        self.limit
    }

    /// Next result, or the terminal error. `None` once production ended.
    pub async fn next(&mut self) -> Option<Result<T, PermgateError>> {
        self.stream.next().await
    }

    /// Split into the consumer stream and the producer handle, whose output
    /// is the lookup's terminal state.
    pub fn into_parts(self) -> (ResultStream<T>, JoinHandle<LookupState>) {
        (self.stream, self.producer)
    }
}

/// Turns lookup requests into capped, cancellable result streams.
#[derive(Clone)]
pub struct LookupEngine {
    repo: Arc<dyn RelationshipRepository>,
    config: EngineConfig,
}

impl fmt::Debug for LookupEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LookupEngine")
            .field("config", &self.config)
            .finish()
    }
}

impl LookupEngine {
    pub fn new(repo: Arc<dyn RelationshipRepository>, config: EngineConfig) -> Self {
        Self { repo, config }
    }

    /// Start a LookupSubjects stream.
    ///
    /// Returns `Err` only for request-shape problems; everything else is
    /// delivered through the stream.
    pub fn lookup_subjects(
        &self,
        ctx: &OpContext,
        query: LookupSubjectsQuery,
    ) -> Result<Lookup<SubjectResult>, PermgateError> {
        query.validate().map_err(|e| e.context("LookupSubjects"))?;
        let limit = self
            .config
            .limits
            .resolve_subjects(query.pagination.as_ref());
        let continuation = query.continuation();
        let repo = self.repo.clone();
        Ok(self.start("LookupSubjects", ctx, limit, move |upstream| async move {
            repo.lookup_subjects(&upstream, &query, limit.as_u32(), continuation)
                .await
        }))
    }

    /// Start a LookupResources stream.
    pub fn lookup_resources(
        &self,
        ctx: &OpContext,
        query: LookupResourcesQuery,
    ) -> Result<Lookup<ResourceResult>, PermgateError> {
        query.validate().map_err(|e| e.context("LookupResources"))?;
        let limit = self
            .config
            .limits
            .resolve_resources(query.pagination.as_ref());
        let continuation = query.continuation();
        let repo = self.repo.clone();
        Ok(self.start("LookupResources", ctx, limit, move |upstream| async move {
            repo.lookup_resources(&upstream, &query, limit.as_u32(), continuation)
                .await
        }))
    }

    /// Start a ReadRelationships stream.
    pub fn read_relationships(
        &self,
        ctx: &OpContext,
        query: ReadRelationshipsQuery,
    ) -> Result<Lookup<RelationshipResult>, PermgateError> {
        query.validate().map_err(|e| e.context("ReadRelationships"))?;
        let limit = self.config.limits.resolve_read(query.pagination.as_ref());
        let continuation = query.pagination.as_ref().and_then(|p| p.continuation());
        let repo = self.repo.clone();
        Ok(self.start("ReadRelationships", ctx, limit, move |upstream| async move {
            repo.read_relationships(&upstream, &query, limit.as_u32(), continuation)
                .await
        }))
    }

    fn start<T, F, Fut>(
        &self,
        op: &'static str,
        ctx: &OpContext,
        limit: LookupLimit,
        open: F,
    ) -> Lookup<T>
    where
        T: Send + 'static,
        F: FnOnce(OpContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<ResultStream<T>, PermgateError>> + Send + 'static,
    {
        let (sink, stream) = ResultStream::channel(self.config.channel_capacity);
        tracing::debug!(op, %limit, state = %LookupState::Created, "lookup created");
        let producer = tokio::spawn(produce(op, ctx.clone(), limit, open, sink));
        Lookup {
            limit,
            stream,
            producer,
        }
    }
}

async fn produce<T, F, Fut>(
    op: &'static str,
    ctx: OpContext,
    limit: LookupLimit,
    open: F,
    sink: ResultSink<T>,
) -> LookupState
where
    F: FnOnce(OpContext) -> Fut,
    Fut: Future<Output = Result<ResultStream<T>, PermgateError>>,
{
    tracing::debug!(op, state = %LookupState::Producing, "lookup producing");

    // The repository gets a child context so it stops as soon as this
    // producer returns, whatever the reason.
    let upstream_ctx = ctx.child();
    let _stop_upstream = upstream_ctx.cancellation().clone().drop_guard();
    let cancel = ctx.cancellation();

    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => return settle(op, LookupState::Canceled, 0),
        opened = open(upstream_ctx.clone()) => opened,
    };
    let mut upstream = match opened {
        Ok(upstream) => upstream,
        Err(err) => {
            sink.fail(err.context(op));
            return settle(op, LookupState::Failed, 0);
        }
    };

    let mut delivered: u64 = 0;
    loop {
        if !limit.allows(delivered) {
            return settle(op, LookupState::Completed, delivered);
        }
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return settle(op, LookupState::Canceled, delivered),
            next = upstream.next() => next,
        };
        match next {
            None => return settle(op, LookupState::Completed, delivered),
            Some(Err(err)) => {
                sink.fail(err.context(op));
                return settle(op, LookupState::Failed, delivered);
            }
            Some(Ok(item)) => {
                let sent = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return settle(op, LookupState::Canceled, delivered),
                    sent = sink.send(item) => sent,
                };
                if !sent {
                    // Consumer dropped its half.
                    return settle(op, LookupState::Canceled, delivered);
                }
                delivered += 1;
            }
        }
    }
}

fn settle(op: &'static str, state: LookupState, delivered: u64) -> LookupState {
    debug_assert!(state.is_terminal());
    tracing::debug!(op, %state, delivered, "lookup finished");
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use permgate_core::model::{
        CheckResult, Consistency, ConsistencyToken, ContinuationToken, LockToken, ObjectRef,
        Relationship, RelationshipFilter, SubjectRef, TouchSemantics,
    };
    use permgate_core::query::{CheckQuery, Pagination};
    use permgate_store::MemoryRepository;

    /// Repository whose lookup streams follow a script.
    #[derive(Default)]
    struct ScriptedRepo {
        subjects: Vec<&'static str>,
        /// Error emitted after all scripted subjects.
        trailing_error: Option<PermgateError>,
        /// Reject the call itself.
        open_error: Option<PermgateError>,
        /// Keep the stream open after the scripted items.
        hang: bool,
        seen_limit: AtomicU32,
    }

    fn subject(id: &str) -> SubjectResult {
        SubjectResult {
            subject: SubjectRef::new(ObjectRef::new("user", id)),
            continuation_token: ContinuationToken::new(id),
            looked_up_at: ConsistencyToken::new("1"),
        }
    }

    fn unscripted<T>() -> Result<T, PermgateError> {
        Err(PermgateError::Internal("not scripted".to_string()))
    }

    #[async_trait]
    impl RelationshipRepository for ScriptedRepo {
        async fn check(&self, _: &OpContext, _: &CheckQuery) -> Result<CheckResult, PermgateError> {
            unscripted()
        }

        async fn create_relationships(
            &self,
            _: &OpContext,
            _: &[Relationship],
            _: TouchSemantics,
        ) -> Result<ConsistencyToken, PermgateError> {
            unscripted()
        }

        async fn read_relationships(
            &self,
            _: &OpContext,
            _: &ReadRelationshipsQuery,
            _: u32,
            _: Option<ContinuationToken>,
        ) -> Result<ResultStream<RelationshipResult>, PermgateError> {
            unscripted()
        }

        async fn delete_relationships(
            &self,
            _: &OpContext,
            _: &RelationshipFilter,
        ) -> Result<ConsistencyToken, PermgateError> {
            unscripted()
        }

        async fn lookup_subjects(
            &self,
            ctx: &OpContext,
            _: &LookupSubjectsQuery,
            limit: u32,
            _: Option<ContinuationToken>,
        ) -> Result<ResultStream<SubjectResult>, PermgateError> {
            self.seen_limit.store(limit, Ordering::SeqCst);
            if let Some(err) = &self.open_error {
                return Err(err.clone());
            }
            let (sink, stream) = ResultStream::channel(1);
            let items: Vec<SubjectResult> = self.subjects.iter().map(|id| subject(id)).collect();
            let trailing = self.trailing_error.clone();
            let hang = self.hang;
            let cancel = ctx.cancellation().clone();
            tokio::spawn(async move {
                // Ignores the limit on purpose: the engine must cap.
                for item in items {
                    if !sink.send(item).await {
                        return;
                    }
                }
                if let Some(err) = trailing {
                    sink.fail(err);
                    return;
                }
                if hang {
                    cancel.cancelled().await;
                }
            });
            Ok(stream)
        }

        async fn lookup_resources(
            &self,
            _: &OpContext,
            _: &LookupResourcesQuery,
            _: u32,
            _: Option<ContinuationToken>,
        ) -> Result<ResultStream<ResourceResult>, PermgateError> {
            unscripted()
        }

        async fn acquire_lock(
            &self,
            _: &OpContext,
            _: &str,
            _: Option<&LockToken>,
        ) -> Result<LockToken, PermgateError> {
            unscripted()
        }

        async fn is_backend_available(&self, _: &OpContext) -> Result<(), PermgateError> {
            Ok(())
        }
    }

    fn subjects_query(pagination: Option<Pagination>) -> LookupSubjectsQuery {
        LookupSubjectsQuery {
            resource: ObjectRef::new("document", "readme"),
            permission: "viewer".to_string(),
            subject_type: "user".to_string(),
            subject_relation: None,
            consistency: Consistency::default(),
            pagination,
        }
    }

    fn engine(repo: Arc<dyn RelationshipRepository>) -> LookupEngine {
        LookupEngine::new(repo, EngineConfig::default())
    }

    async fn drain<T>(lookup: Lookup<T>) -> (Vec<T>, Option<PermgateError>, LookupState) {
        let (mut stream, producer) = lookup.into_parts();
        let mut items = Vec::new();
        let mut error = None;
        while let Some(next) = stream.next().await {
            match next {
                Ok(item) => items.push(item),
                Err(err) => error = Some(err),
            }
        }
        let state = tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .expect("producer finished")
            .expect("producer did not panic");
        (items, error, state)
    }

    #[tokio::test]
    async fn test_relays_in_order_and_completes() {
        let repo = Arc::new(ScriptedRepo {
            subjects: vec!["alice", "bob"],
            ..Default::default()
        });
        let lookup = engine(repo.clone())
            .lookup_subjects(&OpContext::new(), subjects_query(None))
            .unwrap();
        assert_eq!(lookup.limit(), LookupLimit::Unbounded);

        let (items, error, state) = drain(lookup).await;
        let ids: Vec<_> = items.iter().map(|r| r.subject.object.object_id.as_str()).collect();
        assert_eq!(ids, vec!["alice", "bob"]);
        assert!(error.is_none());
        assert_eq!(state, LookupState::Completed);
        assert_eq!(repo.seen_limit.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_caps_at_limit_even_if_backend_yields_more() {
        let repo = Arc::new(ScriptedRepo {
            subjects: vec!["a", "b", "c", "d", "e"],
            hang: true,
            ..Default::default()
        });
        let lookup = engine(repo.clone())
            .lookup_subjects(&OpContext::new(), subjects_query(Some(Pagination::with_limit(3))))
            .unwrap();
        let (items, error, state) = drain(lookup).await;
        assert_eq!(items.len(), 3);
        assert!(error.is_none());
        assert_eq!(state, LookupState::Completed);
        assert_eq!(repo.seen_limit.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_immediate_backend_failure() {
        let repo = Arc::new(ScriptedRepo {
            open_error: Some(PermgateError::Unavailable("down".to_string())),
            ..Default::default()
        });
        let lookup = engine(repo)
            .lookup_subjects(&OpContext::new(), subjects_query(None))
            .unwrap();
        let (items, error, state) = drain(lookup).await;
        assert!(items.is_empty());
        let error = error.expect("exactly one error");
        assert!(matches!(error, PermgateError::Unavailable(_)));
        assert!(error.message().starts_with("LookupSubjects"));
        assert_eq!(state, LookupState::Failed);
    }

    #[tokio::test]
    async fn test_error_after_items_stops_stream() {
        let repo = Arc::new(ScriptedRepo {
            subjects: vec!["alice"],
            trailing_error: Some(PermgateError::Internal("graph too deep".to_string())),
            ..Default::default()
        });
        let lookup = engine(repo)
            .lookup_subjects(&OpContext::new(), subjects_query(None))
            .unwrap();
        let (items, error, state) = drain(lookup).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(error, Some(PermgateError::Internal(_))));
        assert_eq!(state, LookupState::Failed);
    }

    #[tokio::test]
    async fn test_request_shape_error_is_immediate() {
        let repo = Arc::new(ScriptedRepo::default());
        let mut query = subjects_query(None);
        query.resource.object_id.clear();
        let err = engine(repo.clone())
            .lookup_subjects(&OpContext::new(), query)
            .unwrap_err();
        assert!(matches!(err, PermgateError::InvalidArgument(_)));
        assert_eq!(repo.seen_limit.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_closes_channels() {
        let repo = Arc::new(ScriptedRepo {
            subjects: vec!["alice", "bob", "carol"],
            hang: true,
            ..Default::default()
        });
        let ctx = OpContext::new();
        let mut lookup = engine(repo)
            .lookup_subjects(&ctx, subjects_query(None))
            .unwrap();
        assert!(lookup.next().await.unwrap().is_ok());

        ctx.cancel();
        let (mut stream, producer) = lookup.into_parts();
        let state = tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .expect("producer stopped after cancellation")
            .unwrap();
        assert_eq!(state, LookupState::Canceled);

        // Channels are closed: the consumer drains whatever was buffered and ends.
        let ended = tokio::time::timeout(Duration::from_secs(1), async {
            while let Some(next) = stream.next().await {
                assert!(next.is_ok());
            }
        })
        .await;
        assert!(ended.is_ok());
    }

    #[tokio::test]
    async fn test_stalled_consumer_does_not_wedge_producer() {
        let repo = Arc::new(ScriptedRepo {
            subjects: vec!["a"; 100],
            ..Default::default()
        });
        let ctx = OpContext::new();
        let config = EngineConfig {
            channel_capacity: 1,
            ..Default::default()
        };
        let lookup = LookupEngine::new(repo, config)
            .lookup_subjects(&ctx, subjects_query(None))
            .unwrap();
        let (_stream, producer) = lookup.into_parts();

        // Never read; cancelling must still release the producer.
        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.cancel();
        let state = tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .expect("producer released")
            .unwrap();
        assert_eq!(state, LookupState::Canceled);
    }

    #[tokio::test]
    async fn test_dropped_consumer_cancels_producer() {
        let repo = Arc::new(ScriptedRepo {
            subjects: vec!["a"; 100],
            ..Default::default()
        });
        let lookup = engine(repo)
            .lookup_subjects(&OpContext::new(), subjects_query(None))
            .unwrap();
        let (stream, producer) = lookup.into_parts();
        drop(stream);
        let state = tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .expect("producer noticed the consumer left")
            .unwrap();
        assert_eq!(state, LookupState::Canceled);
    }

    #[tokio::test]
    async fn test_resources_against_memory_backend() {
        let repo = Arc::new(MemoryRepository::new());
        let me = SubjectRef::new(ObjectRef::new("user", "alice"));
        let rels: Vec<_> = ["w1", "w2", "w3"]
            .iter()
            .map(|w| Relationship::new(ObjectRef::new("workspace", *w), "member", me.clone()))
            .collect();
        repo.create_relationships(&OpContext::new(), &rels, TouchSemantics::Create)
            .await
            .unwrap();

        let query = LookupResourcesQuery {
            resource_type: "workspace".to_string(),
            permission: "member".to_string(),
            subject: me,
            consistency: Consistency::default(),
            pagination: Some(Pagination::with_limit(2)),
        };
        let lookup = engine(repo)
            .lookup_resources(&OpContext::new(), query)
            .unwrap();
        assert_eq!(lookup.limit().as_u32(), 2);
        let (items, error, state) = drain(lookup).await;
        assert_eq!(items.len(), 2);
        assert!(error.is_none());
        assert_eq!(state, LookupState::Completed);
    }
}
