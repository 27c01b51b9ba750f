// crates/permgate-rpc/src/handlers/health.rs
//
// Liveness and readiness probes.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use permgate_query::ReadinessProbe;

use crate::error::CallError;
use crate::interceptors::Handler;
use crate::stream::{recv_request, send_json, Request, ServerStream};

/// Probes take no parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeRequest {}

impl Request for ProbeRequest {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResponse {
    pub status: String,
}

impl ProbeResponse {
    fn serving() -> Self {
        Self {
            status: "serving".to_string(),
        }
    }
}

pub struct LivenessHandler {
    probe: Arc<ReadinessProbe>,
}

impl LivenessHandler {
    pub fn new(probe: Arc<ReadinessProbe>) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl Handler for LivenessHandler {
    async fn call(&self, stream: &mut dyn ServerStream) -> Result<(), CallError> {
        let _: ProbeRequest = recv_request(stream).await?;
        self.probe.live()?;
        send_json(stream, &ProbeResponse::serving()).await
    }
}

pub struct ReadinessHandler {
    probe: Arc<ReadinessProbe>,
}

impl ReadinessHandler {
    pub fn new(probe: Arc<ReadinessProbe>) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl Handler for ReadinessHandler {
    async fn call(&self, stream: &mut dyn ServerStream) -> Result<(), CallError> {
        let _: ProbeRequest = recv_request(stream).await?;
        let ctx = stream.context().op_context();
        self.probe.check(&ctx).await?;
        send_json(stream, &ProbeResponse::serving()).await
    }
}
