// crates/permgate-rpc/src/handlers/mod.rs
//
// Handlers for every RPC method, the request types they receive, and the
// route table mapping full method names to handlers.

pub mod check;
pub mod health;
pub mod lock;
pub mod lookup;
pub mod relationships;

use std::sync::Arc;

use permgate_core::error::PermgateError;
use permgate_core::query::{
    CheckQuery, LookupResourcesQuery, LookupSubjectsQuery, ReadRelationshipsQuery,
};
use permgate_core::traits::RelationshipRepository;
use permgate_query::{Lookup, LookupEngine, LockService, ReadinessProbe};

use crate::context::CallKind;
use crate::error::CallError;
use crate::interceptors::Handler;
use crate::stream::{send_json, Request, ServerStream, Validate};

// ---------------------------------------------------------------------------
// Method names
// ---------------------------------------------------------------------------

pub const CHECK: &str = "permgate.v1.PermissionsService/Check";
pub const CREATE_RELATIONSHIPS: &str = "permgate.v1.PermissionsService/CreateRelationships";
pub const DELETE_RELATIONSHIPS: &str = "permgate.v1.PermissionsService/DeleteRelationships";
pub const READ_RELATIONSHIPS: &str = "permgate.v1.PermissionsService/ReadRelationships";
pub const LOOKUP_SUBJECTS: &str = "permgate.v1.PermissionsService/LookupSubjects";
pub const LOOKUP_RESOURCES: &str = "permgate.v1.PermissionsService/LookupResources";
pub const ACQUIRE_LOCK: &str = "permgate.v1.LockService/AcquireLock";
pub const LIVENESS: &str = "permgate.v1.HealthService/Liveness";
pub const READINESS: &str = "permgate.v1.HealthService/Readiness";

// ---------------------------------------------------------------------------
// Request capabilities for the core query types
// ---------------------------------------------------------------------------

/// Registers core query types as validated requests, delegating to their
/// inherent `validate`.
macro_rules! validated_request {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Validate for $ty {
                fn validate(&self) -> Result<(), PermgateError> {
                    <$ty>::validate(self)
                }
            }

            impl Request for $ty {
                fn validator(&self) -> Option<&dyn Validate> {
                    Some(self)
                }
            }
        )*
    };
}

validated_request!(
    CheckQuery,
    ReadRelationshipsQuery,
    LookupSubjectsQuery,
    LookupResourcesQuery,
);

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

/// Shared collaborators every handler draws from.
#[derive(Clone)]
pub struct Services {
    pub repo: Arc<dyn RelationshipRepository>,
    pub engine: LookupEngine,
    pub locks: LockService,
    pub readiness: Arc<ReadinessProbe>,
}

impl Services {
    pub fn new(
        repo: Arc<dyn RelationshipRepository>,
        engine: LookupEngine,
        readiness_sticky: bool,
    ) -> Self {
        Self {
            locks: LockService::new(repo.clone()),
            readiness: Arc::new(ReadinessProbe::new(repo.clone(), readiness_sticky)),
            engine,
            repo,
        }
    }
}

/// One entry of the route table.
#[derive(Clone)]
pub struct Route {
    pub method: &'static str,
    pub kind: CallKind,
    pub handler: Arc<dyn Handler>,
}

impl Route {
    fn unary(method: &'static str, handler: Arc<dyn Handler>) -> Self {
        Self {
            method,
            kind: CallKind::Unary,
            handler,
        }
    }

    fn streaming(method: &'static str, handler: Arc<dyn Handler>) -> Self {
        Self {
            method,
            kind: CallKind::ServerStreaming,
            handler,
        }
    }
}

/// Every method the gateway serves.
pub fn routes(services: &Services) -> Vec<Route> {
    vec![
        Route::unary(CHECK, Arc::new(check::CheckHandler::new(services.repo.clone()))),
        Route::unary(
            CREATE_RELATIONSHIPS,
            Arc::new(relationships::CreateRelationshipsHandler::new(services.repo.clone())),
        ),
        Route::unary(
            DELETE_RELATIONSHIPS,
            Arc::new(relationships::DeleteRelationshipsHandler::new(services.repo.clone())),
        ),
        Route::streaming(
            READ_RELATIONSHIPS,
            Arc::new(relationships::ReadRelationshipsHandler::new(services.engine.clone())),
        ),
        Route::streaming(
            LOOKUP_SUBJECTS,
            Arc::new(lookup::LookupSubjectsHandler::new(services.engine.clone())),
        ),
        Route::streaming(
            LOOKUP_RESOURCES,
            Arc::new(lookup::LookupResourcesHandler::new(services.engine.clone())),
        ),
        Route::unary(
            ACQUIRE_LOCK,
            Arc::new(lock::AcquireLockHandler::new(services.locks.clone())),
        ),
        Route::unary(
            LIVENESS,
            Arc::new(health::LivenessHandler::new(services.readiness.clone())),
        ),
        Route::unary(
            READINESS,
            Arc::new(health::ReadinessHandler::new(services.readiness.clone())),
        ),
    ]
}

// ---------------------------------------------------------------------------
// Streaming relay
// ---------------------------------------------------------------------------

/// Forward every item of `lookup` to the client. The first error ends the
/// call with that error; a cancelled call ends with `Cancelled` even if the
/// stream closed cleanly.
pub(crate) async fn forward_lookup<T: serde::Serialize>(
    stream: &mut dyn ServerStream,
    lookup: Lookup<T>,
) -> Result<(), CallError> {
    let (mut results, _producer) = lookup.into_parts();
    let mut sent: u64 = 0;
    while let Some(next) = results.next().await {
        let item = next?;
        send_json(stream, &item).await?;
        sent += 1;
    }
    if stream.context().is_cancelled() {
        return Err(CallError::canceled("call canceled"));
    }
    tracing::debug!(sent, "stream complete");
    Ok(())
}
