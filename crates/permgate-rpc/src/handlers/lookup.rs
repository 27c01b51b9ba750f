// crates/permgate-rpc/src/handlers/lookup.rs
//
// The two lookup streams. Limit resolution, capping and cancellation all
// happen in the engine; these handlers only relay.

use async_trait::async_trait;

use permgate_core::query::{LookupResourcesQuery, LookupSubjectsQuery};
use permgate_query::LookupEngine;

use crate::error::CallError;
use crate::handlers::forward_lookup;
use crate::interceptors::Handler;
use crate::stream::{recv_request, ServerStream};

pub struct LookupSubjectsHandler {
    engine: LookupEngine,
}

impl LookupSubjectsHandler {
    pub fn new(engine: LookupEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Handler for LookupSubjectsHandler {
    async fn call(&self, stream: &mut dyn ServerStream) -> Result<(), CallError> {
        let query: LookupSubjectsQuery = recv_request(stream).await?;
        let ctx = stream.context().op_context();
        let lookup = self.engine.lookup_subjects(&ctx, query)?;
        tracing::debug!(limit = %lookup.limit(), "lookup subjects");
        forward_lookup(stream, lookup).await
    }
}

pub struct LookupResourcesHandler {
    engine: LookupEngine,
}

impl LookupResourcesHandler {
    pub fn new(engine: LookupEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Handler for LookupResourcesHandler {
    async fn call(&self, stream: &mut dyn ServerStream) -> Result<(), CallError> {
        let query: LookupResourcesQuery = recv_request(stream).await?;
        let ctx = stream.context().op_context();
        let lookup = self.engine.lookup_resources(&ctx, query)?;
        tracing::debug!(limit = %lookup.limit(), "lookup resources");
        forward_lookup(stream, lookup).await
    }
}
