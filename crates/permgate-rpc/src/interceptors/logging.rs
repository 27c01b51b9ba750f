// crates/permgate-rpc/src/interceptors/logging.rs

use std::time::Instant;

use async_trait::async_trait;

use crate::error::CallError;
use crate::interceptors::{Interceptor, Next};
use crate::stream::ServerStream;

/// One event per call: method, kind, latency, the first request message,
/// and the outcome. ERROR when the call failed, INFO otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingInterceptor;

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn intercept(
        &self,
        stream: &mut dyn ServerStream,
        next: Next<'_>,
    ) -> Result<(), CallError> {
        let started = Instant::now();
        let result = next.run(stream).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let ctx = stream.context();
        let request = stream.first_message().unwrap_or("");
        match &result {
            Ok(()) => tracing::info!(
                method = ctx.full_method(),
                kind = %ctx.kind(),
                latency_ms,
                request,
                code = "ok",
                "call finished"
            ),
            Err(err) => tracing::error!(
                method = ctx.full_method(),
                kind = %ctx.kind(),
                latency_ms,
                request,
                code = err.code_label(),
                reason = %err.reason,
                error = %err.message,
                "call failed"
            ),
        }
        result
    }
}
