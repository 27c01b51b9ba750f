// crates/permgate-rpc/src/interceptors/mod.rs
//
// The interceptor chain.
//
// A chain is an ordered list of stages built once at startup. Each stage
// receives the call's stream and a `Next` it must run to continue; not
// running it short-circuits the call. `InterceptorChain::standard` is the
// one place the production order is fixed:
//
//   Recovery -> Validation -> Tracing -> Logging -> Metrics -> Auth -> handler
//
// Recovery is outermost so it sees faults from every other stage. Logging
// and Metrics time everything inside them. Validation and Auth both fail
// before the handler does any work.

pub mod auth;
pub mod logging;
pub mod metrics;
pub mod recovery;
pub mod trace;
pub mod validation;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CallError;
use crate::stream::{ServerStream, WrappedStream};

pub use auth::{AuthConfig, AuthError, AuthInterceptor, Claims, KeyResolver};
pub use logging::LoggingInterceptor;
pub use metrics::{MetricsInterceptor, RpcMetrics};
pub use recovery::RecoveryInterceptor;
pub use trace::TracingInterceptor;
pub use validation::ValidationInterceptor;

/// The business end of a call.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, stream: &mut dyn ServerStream) -> Result<(), CallError>;
}

/// One stage of the chain.
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept(
        &self,
        stream: &mut dyn ServerStream,
        next: Next<'_>,
    ) -> Result<(), CallError>;
}

/// The rest of the chain after the current stage.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Arc<dyn Interceptor>],
    handler: &'a dyn Handler,
}

impl<'a> Next<'a> {
    pub async fn run(self, stream: &mut dyn ServerStream) -> Result<(), CallError> {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                let next = Next {
                    stages: rest,
                    handler: self.handler,
                };
                stage.intercept(stream, next).await
            }
            None => self.handler.call(stream).await,
        }
    }
}

/// Stage configuration for [`InterceptorChain::standard`].
#[derive(Default)]
pub struct ChainConfig {
    pub metrics: Option<RpcMetrics>,
    pub auth: Option<AuthConfig>,
}

#[derive(Clone, Default)]
pub struct InterceptorChain {
    stages: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    /// A chain running `stages` outermost first.
    pub fn new(stages: Vec<Arc<dyn Interceptor>>) -> Self {
        Self { stages }
    }

    /// The production chain. Stages whose configuration is absent are left
    /// out; the relative order of the rest never changes.
    pub fn standard(config: ChainConfig) -> Self {
        let mut stages: Vec<Arc<dyn Interceptor>> = vec![
            Arc::new(RecoveryInterceptor),
            Arc::new(ValidationInterceptor),
            Arc::new(TracingInterceptor),
            Arc::new(LoggingInterceptor),
        ];
        if let Some(metrics) = config.metrics {
            stages.push(Arc::new(MetricsInterceptor::new(metrics)));
        }
        if let Some(auth) = config.auth {
            stages.push(Arc::new(AuthInterceptor::new(auth)));
        }
        Self { stages }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Drive one call through every stage and then `handler`.
    pub async fn run(
        &self,
        stream: &mut dyn ServerStream,
        handler: &dyn Handler,
    ) -> Result<(), CallError> {
        let mut wrapped = WrappedStream::new(stream);
        let next = Next {
            stages: &self.stages,
            handler,
        };
        next.run(&mut wrapped).await
    }
}
