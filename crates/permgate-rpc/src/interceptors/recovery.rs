// crates/permgate-rpc/src/interceptors/recovery.rs

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;

use crate::error::CallError;
use crate::interceptors::{Interceptor, Next};
use crate::stream::ServerStream;

/// Turns a panic anywhere inside the chain into a logged `Internal` error
/// so one faulty call cannot take the process down.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryInterceptor;

#[async_trait]
impl Interceptor for RecoveryInterceptor {
    async fn intercept(
        &self,
        stream: &mut dyn ServerStream,
        next: Next<'_>,
    ) -> Result<(), CallError> {
        let started = Instant::now();
        match AssertUnwindSafe(next.run(stream)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let ctx = stream.context();
                tracing::error!(
                    method = ctx.full_method(),
                    kind = %ctx.kind(),
                    elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
                    request = stream.first_message().unwrap_or(""),
                    panic = panic_message(payload.as_ref()),
                    "recovered from panic in call"
                );
                Err(CallError::internal("panic", "internal error"))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
