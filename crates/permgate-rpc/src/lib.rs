// crates/permgate-rpc/src/lib.rs
//
// permgate-rpc: The call pipeline and transport for the permgate gateway.
//
// Every inbound call is described by a `CallContext`, driven through a
// `ServerStream`, and handed to an `InterceptorChain` whose stages
// (recovery, validation, tracing, logging, metrics, authentication) wrap
// the business handler. The transport is JSON-RPC over tonic without
// protobuf codegen; streaming calls answer with newline-delimited JSON.

pub mod context;
pub mod error;
pub mod handlers;
pub mod interceptors;
pub mod server;
pub mod stream;

pub use context::{CallContext, CallKind};
pub use error::CallError;
pub use interceptors::{ChainConfig, Handler, Interceptor, InterceptorChain, Next};
pub use server::{Gateway, PermgateRpcServer, RpcConfig};
pub use stream::{Message, Request, ServerStream, Validate, WrappedStream};
