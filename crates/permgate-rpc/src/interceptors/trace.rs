// crates/permgate-rpc/src/interceptors/trace.rs

use async_trait::async_trait;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::CallError;
use crate::interceptors::{Interceptor, Next};
use crate::stream::ServerStream;

/// Metadata key carrying a caller-supplied trace id.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Runs the rest of the call inside one `rpc` span keyed by a trace id,
/// taken from `x-trace-id` or freshly generated.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingInterceptor;

#[async_trait]
impl Interceptor for TracingInterceptor {
    async fn intercept(
        &self,
        stream: &mut dyn ServerStream,
        next: Next<'_>,
    ) -> Result<(), CallError> {
        let trace_id = stream
            .context()
            .metadata_str(TRACE_ID_HEADER)
            .map(str::to_owned)
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        stream.context_mut().set_trace_id(trace_id.clone());

        let span = {
            let ctx = stream.context();
            tracing::info_span!(
                "rpc",
                method = ctx.full_method(),
                kind = %ctx.kind(),
                trace_id = %trace_id,
            )
        };
        next.run(stream).instrument(span).await
    }
}
