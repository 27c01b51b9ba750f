// crates/permgate-rpc/src/interceptors/metrics.rs

use std::time::{Duration, Instant};

use async_trait::async_trait;
use prometheus::{histogram_opts, HistogramVec, IntCounterVec, Opts, Registry};

use crate::context::CallKind;
use crate::error::CallError;
use crate::interceptors::{Interceptor, Next};
use crate::stream::ServerStream;

/// Call instruments, registered against a caller-owned registry.
#[derive(Clone)]
pub struct RpcMetrics {
    requests: IntCounterVec,
    latency: HistogramVec,
}

impl RpcMetrics {
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let requests = IntCounterVec::new(
            Opts::new(
                "permgate_rpc_requests_total",
                "Completed calls by kind, method, result code and reason",
            ),
            &["kind", "method", "code", "reason"],
        )?;
        let latency = HistogramVec::new(
            histogram_opts!(
                "permgate_rpc_latency_seconds",
                "End-to-end call latency inside the interceptor chain",
                vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
            ),
            &["kind", "method"],
        )?;
        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(latency.clone()))?;
        Ok(Self { requests, latency })
    }

    pub fn observe(
        &self,
        kind: CallKind,
        method: &str,
        outcome: Result<(), &CallError>,
        elapsed: Duration,
    ) {
        let (code, reason) = match outcome {
            Ok(()) => ("ok", ""),
            Err(err) => (err.code_label(), err.reason.as_str()),
        };
        self.requests
            .with_label_values(&[kind.as_str(), method, code, reason])
            .inc();
        self.latency
            .with_label_values(&[kind.as_str(), method])
            .observe(elapsed.as_secs_f64());
    }

    pub fn requests(&self) -> &IntCounterVec {
        &self.requests
    }

    pub fn latency(&self) -> &HistogramVec {
        &self.latency
    }
}

pub struct MetricsInterceptor {
    metrics: RpcMetrics,
}

impl MetricsInterceptor {
    pub fn new(metrics: RpcMetrics) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl Interceptor for MetricsInterceptor {
    async fn intercept(
        &self,
        stream: &mut dyn ServerStream,
        next: Next<'_>,
    ) -> Result<(), CallError> {
        let started = Instant::now();
        let result = next.run(stream).await;
        let ctx = stream.context();
        self.metrics.observe(
            ctx.kind(),
            ctx.full_method(),
            result.as_ref().map(|_| ()),
            started.elapsed(),
        );
        result
    }
}
