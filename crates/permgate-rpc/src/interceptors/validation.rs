// crates/permgate-rpc/src/interceptors/validation.rs

use async_trait::async_trait;

use crate::context::CallContext;
use crate::error::CallError;
use crate::interceptors::{Interceptor, Next};
use crate::stream::{Message, ServerStream};

/// Validates every inbound message as it is decoded. A failing message
/// ends the call with `bad_request` before the handler can act on it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationInterceptor;

#[async_trait]
impl Interceptor for ValidationInterceptor {
    async fn intercept(
        &self,
        stream: &mut dyn ServerStream,
        next: Next<'_>,
    ) -> Result<(), CallError> {
        let mut validating = ValidatingStream { inner: stream };
        next.run(&mut validating).await
    }
}

struct ValidatingStream<'a> {
    inner: &'a mut dyn ServerStream,
}

#[async_trait]
impl ServerStream for ValidatingStream<'_> {
    fn context(&self) -> &CallContext {
        self.inner.context()
    }

    fn context_mut(&mut self) -> &mut CallContext {
        self.inner.context_mut()
    }

    async fn recv_msg(&mut self, msg: &mut dyn Message) -> Result<bool, CallError> {
        let received = self.inner.recv_msg(msg).await?;
        if received {
            if let Some(validator) = msg.validator() {
                validator
                    .validate()
                    .map_err(|cause| CallError::bad_request(cause.to_string()))?;
            }
        }
        Ok(received)
    }

    async fn send_msg(&mut self, msg: serde_json::Value) -> Result<(), CallError> {
        self.inner.send_msg(msg).await
    }

    fn first_message(&self) -> Option<&str> {
        self.inner.first_message()
    }
}
