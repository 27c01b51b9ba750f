// crates/permgate-rpc/src/server.rs
//
// RPC server setup: PermgateRpcServer, the Gateway dispatcher, and the
// JSON-RPC-over-tonic transport.
//
// A single tonic service accepts JSON-encoded `{method, params}` envelopes
// on `POST /permgate.v1.Gateway/Call`, builds a call context from the HTTP
// headers, and drives the call through the interceptor chain. Unary calls
// answer with one JSON envelope. Server-streaming calls answer with
// newline-delimited JSON frames, the last of which carries the error if the
// call failed. `GET /permgate.v1.Gateway/Metrics` serves the Prometheus
// registry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::HeaderMap;
use http_body::Body as HttpBody;
use http_body_util::{BodyExt, StreamBody};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::body::BoxBody;
use tonic::transport::Server;
use tonic::Status;

use crate::context::{CallContext, CallKind};
use crate::error::{CallError, WireError};
use crate::handlers::{self, Route, Services};
use crate::interceptors::{Handler, InterceptorChain};
use crate::stream::{CallStream, Outbound, ServerStream};

/// Frames buffered between a streaming handler and the HTTP body.
const STREAM_BUFFER: usize = 16;

// ---------------------------------------------------------------------------
// RpcConfig
// ---------------------------------------------------------------------------

/// Configuration for the RPC server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Host to bind to (e.g., "127.0.0.1" or "0.0.0.0").
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Upper bound on a single call, streaming calls included.
    pub request_timeout_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 50051,
            request_timeout_ms: 30_000,
        }
    }
}

// ---------------------------------------------------------------------------
// JSON-RPC Envelope
// ---------------------------------------------------------------------------

/// A JSON-RPC-style request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Full method name, e.g. "permgate.v1.PermissionsService/Check".
    pub method: String,
    /// JSON-encoded parameters for the method.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// A JSON-RPC-style response envelope; also one frame of a streaming reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl JsonRpcResponse {
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(err: &CallError) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(WireError::from(err)),
        }
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// What a call produced.
#[derive(Debug)]
pub enum Reply {
    Unary(Result<serde_json::Value, CallError>),
    Stream(mpsc::Receiver<Result<serde_json::Value, CallError>>),
}

impl Reply {
    /// Drain the reply: every successful message, then the error if the
    /// call failed.
    pub async fn collect(self) -> (Vec<serde_json::Value>, Option<CallError>) {
        match self {
            Reply::Unary(Ok(value)) => (vec![value], None),
            Reply::Unary(Err(err)) => (Vec::new(), Some(err)),
            Reply::Stream(mut rx) => {
                let mut items = Vec::new();
                while let Some(frame) = rx.recv().await {
                    match frame {
                        Ok(item) => items.push(item),
                        Err(err) => return (items, Some(err)),
                    }
                }
                (items, None)
            }
        }
    }
}

/// Routes calls by full method name and runs them through the chain.
pub struct Gateway {
    routes: HashMap<&'static str, Route>,
    chain: InterceptorChain,
    request_timeout: Duration,
}

impl Gateway {
    pub fn new(services: &Services, chain: InterceptorChain, request_timeout: Duration) -> Self {
        Self::with_routes(handlers::routes(services), chain, request_timeout)
    }

    pub fn with_routes(routes: Vec<Route>, chain: InterceptorChain, request_timeout: Duration) -> Self {
        Self {
            routes: routes.into_iter().map(|route| (route.method, route)).collect(),
            chain,
            request_timeout,
        }
    }

    /// Start one call. Streaming calls run on their own task and report
    /// through the returned receiver; dropping it cancels the call.
    pub async fn call(
        self: &Arc<Self>,
        method: &str,
        params: serde_json::Value,
        metadata: HeaderMap,
    ) -> Reply {
        let Some(route) = self.routes.get(method).cloned() else {
            tracing::warn!(method, "call to unknown method");
            return Reply::Unary(Err(CallError::unknown_method(method)));
        };

        match route.kind {
            CallKind::Unary => {
                let (result, stream) = self
                    .invoke(&route, metadata, params, Outbound::Buffer(Vec::new()))
                    .await;
                Reply::Unary(result.and_then(|()| {
                    stream.into_sent().into_iter().next().ok_or_else(|| {
                        CallError::internal("no_response", "handler sent no response")
                    })
                }))
            }
            CallKind::ServerStreaming => {
                let (tx, rx) = mpsc::channel(STREAM_BUFFER);
                let gateway = Arc::clone(self);
                tokio::spawn(async move {
                    let (result, stream) = gateway
                        .invoke(&route, metadata, params, Outbound::Channel(tx.clone()))
                        .await;
                    drop(stream);
                    if let Err(err) = result {
                        // The client may be gone already.
                        let _ = tx.send(Err(err)).await;
                    }
                });
                Reply::Stream(rx)
            }
        }
    }

    async fn invoke(
        &self,
        route: &Route,
        metadata: HeaderMap,
        params: serde_json::Value,
        outbound: Outbound,
    ) -> (Result<(), CallError>, CallStream) {
        let cancel = CancellationToken::new();
        // Whatever the handler left running stops with the call.
        let _cancel_on_exit = cancel.clone().drop_guard();

        let context = CallContext::new(route.kind, route.method)
            .with_metadata(metadata)
            .with_cancellation(cancel);
        let mut stream = CallStream::new(context, [params], outbound);
        let handler = Deadline {
            inner: route.handler.as_ref(),
            timeout: self.request_timeout,
        };
        let result = self.chain.run(&mut stream, &handler).await;
        (result, stream)
    }
}

/// Bounds the handler by the request timeout. On expiry the call's
/// cancellation fires so background producers stop too.
struct Deadline<'a> {
    inner: &'a dyn Handler,
    timeout: Duration,
}

#[async_trait]
impl Handler for Deadline<'_> {
    async fn call(&self, stream: &mut dyn ServerStream) -> Result<(), CallError> {
        match tokio::time::timeout(self.timeout, self.inner.call(stream)).await {
            Ok(result) => result,
            Err(_) => {
                stream.context().cancellation().cancel();
                Err(CallError::deadline_exceeded(format!(
                    "call exceeded {} ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// PermgateRpcServer
// ---------------------------------------------------------------------------

/// The permgate RPC server: a gateway plus the registry it reports into.
#[derive(Clone)]
pub struct PermgateRpcServer {
    config: RpcConfig,
    gateway: Arc<Gateway>,
    registry: Registry,
}

impl std::fmt::Debug for PermgateRpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermgateRpcServer")
            .field("config", &self.config)
            .finish()
    }
}

impl PermgateRpcServer {
    pub fn new(config: RpcConfig, gateway: Gateway, registry: Registry) -> Self {
        Self {
            config,
            gateway: Arc::new(gateway),
            registry,
        }
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// The tower service, for embedding or tests.
    pub fn service(&self) -> PermgateJsonRpcServer {
        PermgateJsonRpcServer {
            gateway: self.gateway.clone(),
            registry: self.registry.clone(),
        }
    }

    /// Serve until `shutdown` resolves.
    pub async fn serve_with_shutdown<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error>>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = format!("{}:{}", self.config.host, self.config.port).parse()?;

        tracing::info!("permgate RPC server starting on {}", addr);

        Server::builder()
            .accept_http1(true)
            .add_service(self.service())
            .serve_with_shutdown(addr, shutdown)
            .await?;

        tracing::info!("permgate RPC server stopped");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tonic Service Wiring
// ---------------------------------------------------------------------------

/// Path suffix of the JSON-RPC entry point.
pub const CALL_PATH: &str = "/permgate.v1.Gateway/Call";
/// Path of the Prometheus scrape endpoint.
pub const METRICS_PATH: &str = "/permgate.v1.Gateway/Metrics";

/// The tonic service wrapper.
#[derive(Clone)]
pub struct PermgateJsonRpcServer {
    gateway: Arc<Gateway>,
    registry: Registry,
}

impl std::fmt::Debug for PermgateJsonRpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermgateJsonRpcServer").finish()
    }
}

impl tonic::server::NamedService for PermgateJsonRpcServer {
    const NAME: &'static str = "permgate.v1.Gateway";
}

impl<B> tower_service::Service<http::Request<B>> for PermgateJsonRpcServer
where
    B: HttpBody + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>> + Send,
    B::Data: Send,
{
    type Response = http::Response<BoxBody>;
    type Error = std::convert::Infallible;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let gateway = self.gateway.clone();
        let registry = self.registry.clone();

        Box::pin(async move {
            let (parts, body) = req.into_parts();

            if parts.method == http::Method::GET && parts.uri.path() == METRICS_PATH {
                return Ok(metrics_response(&registry));
            }

            let body_bytes = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    let e: Box<dyn std::error::Error + Send + Sync> = e.into();
                    let err =
                        CallError::bad_request(format!("failed to read request body: {}", e));
                    tracing::error!("{}", err);
                    return Ok(json_response(&JsonRpcResponse::failed(&err)));
                }
            };

            let rpc_request: JsonRpcRequest = match serde_json::from_slice(&body_bytes) {
                Ok(r) => r,
                Err(e) => {
                    let err = CallError::bad_request(format!("invalid JSON-RPC request: {}", e));
                    return Ok(json_response(&JsonRpcResponse::failed(&err)));
                }
            };

            let reply = gateway
                .call(&rpc_request.method, rpc_request.params, parts.headers)
                .await;
            Ok(match reply {
                Reply::Unary(Ok(result)) => json_response(&JsonRpcResponse::ok(result)),
                Reply::Unary(Err(err)) => json_response(&JsonRpcResponse::failed(&err)),
                Reply::Stream(rx) => ndjson_response(rx),
            })
        })
    }
}

fn with_content_type(body: BoxBody, content_type: &'static str) -> http::Response<BoxBody> {
    let mut response = http::Response::new(body);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Build an HTTP response with one JSON envelope.
fn json_response(envelope: &JsonRpcResponse) -> http::Response<BoxBody> {
    let json = serde_json::to_vec(envelope).unwrap_or_default();
    let body = BoxBody::new(
        http_body_util::Full::new(Bytes::from(json))
            .map_err(|e| Status::internal(format!("body error: {}", e))),
    );
    with_content_type(body, "application/json")
}

/// Build a streaming HTTP response, one JSON frame per line.
fn ndjson_response(
    rx: mpsc::Receiver<Result<serde_json::Value, CallError>>,
) -> http::Response<BoxBody> {
    use tokio_stream::StreamExt;

    let frames = ReceiverStream::new(rx).map(|item| {
        let envelope = match item {
            Ok(result) => JsonRpcResponse::ok(result),
            Err(err) => JsonRpcResponse::failed(&err),
        };
        let mut line = serde_json::to_vec(&envelope).unwrap_or_default();
        line.push(b'\n');
        Ok::<_, Status>(http_body::Frame::data(Bytes::from(line)))
    });
    with_content_type(BoxBody::new(StreamBody::new(frames)), "application/x-ndjson")
}

/// Prometheus text exposition of `registry`.
fn metrics_response(registry: &Registry) -> http::Response<BoxBody> {
    let mut buffer = Vec::new();
    let mut response_status = http::StatusCode::OK;
    if let Err(err) = TextEncoder::new().encode(&registry.gather(), &mut buffer) {
        tracing::error!(?err, "failed to encode metrics");
        buffer = format!("failed to encode metrics: {}", err).into_bytes();
        response_status = http::StatusCode::INTERNAL_SERVER_ERROR;
    }
    let body = BoxBody::new(
        http_body_util::Full::new(Bytes::from(buffer))
            .map_err(|e| Status::internal(format!("body error: {}", e))),
    );
    let mut response = with_content_type(body, "text/plain; version=0.0.4");
    *response.status_mut() = response_status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;
    use serde_json::json;
    use tower_service::Service;

    use permgate_core::traits::RelationshipRepository;
    use permgate_query::{EngineConfig, LookupEngine};
    use permgate_store::MemoryRepository;

    use crate::handlers::{CREATE_RELATIONSHIPS, LIVENESS, LOOKUP_SUBJECTS};
    use crate::interceptors::{ChainConfig, RpcMetrics};

    fn server() -> PermgateRpcServer {
        let repo: Arc<dyn RelationshipRepository> = Arc::new(MemoryRepository::new());
        let engine = LookupEngine::new(repo.clone(), EngineConfig::default());
        let services = Services::new(repo, engine, true);
        let registry = Registry::new();
        let chain = InterceptorChain::standard(ChainConfig {
            metrics: Some(RpcMetrics::register(&registry).unwrap()),
            auth: None,
        });
        let gateway = Gateway::new(&services, chain, Duration::from_secs(5));
        PermgateRpcServer::new(RpcConfig::default(), gateway, registry)
    }

    fn post(envelope: serde_json::Value) -> http::Request<Full<Bytes>> {
        http::Request::builder()
            .method(http::Method::POST)
            .uri(CALL_PATH)
            .body(Full::new(Bytes::from(envelope.to_string())))
            .unwrap()
    }

    async fn body_text(response: http::Response<BoxBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_unary_envelope() {
        let mut service = server().service();
        let response = service
            .call(post(json!({"method": LIVENESS})))
            .await
            .unwrap();
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        let envelope: JsonRpcResponse = serde_json::from_str(&body_text(response).await).unwrap();
        assert!(envelope.success);
        assert_eq!(envelope.result, Some(json!({"status": "serving"})));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let mut service = server().service();
        let response = service
            .call(post(json!({"method": "permgate.v1.Nope/Nothing", "params": {}})))
            .await
            .unwrap();
        let envelope: JsonRpcResponse = serde_json::from_str(&body_text(response).await).unwrap();
        assert!(!envelope.success);
        assert_eq!(envelope.error.unwrap().reason, "unknown_method");
    }

    #[tokio::test]
    async fn test_garbage_body() {
        let mut service = server().service();
        let request = http::Request::builder()
            .method(http::Method::POST)
            .uri(CALL_PATH)
            .body(Full::new(Bytes::from_static(b"{not json")))
            .unwrap();
        let response = service.call(request).await.unwrap();
        let envelope: JsonRpcResponse = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(envelope.error.unwrap().reason, "bad_request");
    }

    #[tokio::test]
    async fn test_streaming_ndjson_and_metrics() {
        let server = server();
        let mut service = server.service();

        let write = json!({
            "method": CREATE_RELATIONSHIPS,
            "params": {
                "relationships": [
                    {
                        "resource": {"object_type": "document", "object_id": "readme"},
                        "relation": "viewer",
                        "subject": {"object": {"object_type": "user", "object_id": "alice"}}
                    },
                    {
                        "resource": {"object_type": "document", "object_id": "readme"},
                        "relation": "viewer",
                        "subject": {"object": {"object_type": "user", "object_id": "bob"}}
                    }
                ]
            }
        });
        let response = service.call(post(write)).await.unwrap();
        let envelope: JsonRpcResponse = serde_json::from_str(&body_text(response).await).unwrap();
        assert!(envelope.success, "{:?}", envelope.error);

        let lookup = json!({
            "method": LOOKUP_SUBJECTS,
            "params": {
                "resource": {"object_type": "document", "object_id": "readme"},
                "permission": "viewer",
                "subject_type": "user"
            }
        });
        let response = service.call(post(lookup)).await.unwrap();
        assert_eq!(response.headers()[CONTENT_TYPE], "application/x-ndjson");
        let text = body_text(response).await;
        let frames: Vec<JsonRpcResponse> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|frame| frame.success));
        assert_eq!(
            frames[0].result.as_ref().unwrap()["subject"]["object"]["object_id"],
            "alice"
        );

        let scrape = http::Request::builder()
            .method(http::Method::GET)
            .uri(METRICS_PATH)
            .body(Full::new(Bytes::new()))
            .unwrap();
        let metrics = body_text(service.call(scrape).await.unwrap()).await;
        assert!(metrics.contains("permgate_rpc_requests_total"));
        assert!(metrics.contains(LOOKUP_SUBJECTS));
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        struct Sleeps;

        #[async_trait]
        impl Handler for Sleeps {
            async fn call(&self, _stream: &mut dyn ServerStream) -> Result<(), CallError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        }

        let route = Route {
            method: "test.Service/Slow",
            kind: CallKind::Unary,
            handler: Arc::new(Sleeps),
        };
        let gateway = Arc::new(Gateway::with_routes(
            vec![route],
            InterceptorChain::default(),
            Duration::from_millis(20),
        ));
        let (items, err) = gateway
            .call("test.Service/Slow", json!({}), HeaderMap::new())
            .await
            .collect()
            .await;
        assert!(items.is_empty());
        assert_eq!(err.unwrap().code, tonic::Code::DeadlineExceeded);
    }
}
