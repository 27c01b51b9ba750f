// crates/permgate-rpc/src/stream.rs
//
// The message stream a call is driven through, the decoded-message
// capability set, and the wrapper that captures the first inbound message
// for observability.

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use permgate_core::error::PermgateError;

use crate::context::CallContext;
use crate::error::CallError;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Structural check a decoded message may expose.
pub trait Validate {
    fn validate(&self) -> Result<(), PermgateError>;
}

/// A decoded inbound message, as seen by the stream and its wrappers.
pub trait Message: Send {
    /// Decode `value` into `self`.
    fn merge_json(&mut self, value: serde_json::Value) -> Result<(), CallError>;

    /// The message's `Validate` capability, if it has one.
    fn validator(&self) -> Option<&dyn Validate> {
        None
    }

    /// String form for logs.
    fn render(&self) -> String;
}

/// A request type a handler can receive.
pub trait Request: DeserializeOwned + fmt::Debug + Send + 'static {
    fn validator(&self) -> Option<&dyn Validate> {
        None
    }
}

/// Slot a handler receives a request into.
impl<T: Request> Message for Option<T> {
    fn merge_json(&mut self, value: serde_json::Value) -> Result<(), CallError> {
        // An absent params object decodes like an empty one.
        let value = match value {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            other => other,
        };
        let decoded = serde_json::from_value(value)
            .map_err(|e| CallError::bad_request(format!("could not decode request: {}", e)))?;
        *self = Some(decoded);
        Ok(())
    }

    fn validator(&self) -> Option<&dyn Validate> {
        self.as_ref().and_then(Request::validator)
    }

    fn render(&self) -> String {
        match self {
            Some(request) => format!("{:?}", request),
            None => String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// ServerStream
// ---------------------------------------------------------------------------

/// One call's message stream, shared by every interceptor and the handler.
#[async_trait]
pub trait ServerStream: Send {
    fn context(&self) -> &CallContext;

    fn context_mut(&mut self) -> &mut CallContext;

    /// Decode the next inbound message into `msg`. `Ok(false)` at end of
    /// input.
    async fn recv_msg(&mut self, msg: &mut dyn Message) -> Result<bool, CallError>;

    /// Send one outbound message.
    async fn send_msg(&mut self, msg: serde_json::Value) -> Result<(), CallError>;

    /// String form of the first inbound message, once one was received.
    fn first_message(&self) -> Option<&str> {
        None
    }
}

/// Receive exactly one request, failing with `bad_request` if the client
/// sent none.
pub async fn recv_request<T: Request>(stream: &mut dyn ServerStream) -> Result<T, CallError> {
    let mut slot: Option<T> = None;
    if !stream.recv_msg(&mut slot).await? {
        return Err(CallError::bad_request("missing request message"));
    }
    slot.ok_or_else(|| CallError::bad_request("missing request message"))
}

/// Serialize and send one response.
pub async fn send_json<T: serde::Serialize>(
    stream: &mut dyn ServerStream,
    response: &T,
) -> Result<(), CallError> {
    let value = serde_json::to_value(response)
        .map_err(|e| CallError::internal("encode", format!("could not encode response: {}", e)))?;
    stream.send_msg(value).await
}

// ---------------------------------------------------------------------------
// WrappedStream
// ---------------------------------------------------------------------------

/// Delegates everything to the underlying stream and keeps a string copy
/// of the first successfully received message. The copy is set once and
/// never changed.
pub struct WrappedStream<'a> {
    inner: &'a mut dyn ServerStream,
    first: Option<String>,
}

impl<'a> WrappedStream<'a> {
    pub fn new(inner: &'a mut dyn ServerStream) -> Self {
        Self { inner, first: None }
    }
}

#[async_trait]
impl ServerStream for WrappedStream<'_> {
    fn context(&self) -> &CallContext {
        self.inner.context()
    }

    fn context_mut(&mut self) -> &mut CallContext {
        self.inner.context_mut()
    }

    async fn recv_msg(&mut self, msg: &mut dyn Message) -> Result<bool, CallError> {
        let received = self.inner.recv_msg(msg).await?;
        if received && self.first.is_none() {
            self.first = Some(msg.render());
        }
        Ok(received)
    }

    async fn send_msg(&mut self, msg: serde_json::Value) -> Result<(), CallError> {
        self.inner.send_msg(msg).await
    }

    fn first_message(&self) -> Option<&str> {
        self.first.as_deref()
    }
}

// ---------------------------------------------------------------------------
// CallStream
// ---------------------------------------------------------------------------

/// Where a [`CallStream`] delivers outbound messages.
#[derive(Debug)]
pub enum Outbound {
    /// Kept in memory until the call returns (unary).
    Buffer(Vec<serde_json::Value>),
    /// Forwarded as produced (server streaming).
    Channel(tokio::sync::mpsc::Sender<Result<serde_json::Value, CallError>>),
}

/// In-process stream over already-decoded JSON messages.
#[derive(Debug)]
pub struct CallStream {
    context: CallContext,
    inbound: std::collections::VecDeque<serde_json::Value>,
    outbound: Outbound,
}

impl CallStream {
    pub fn new(
        context: CallContext,
        inbound: impl IntoIterator<Item = serde_json::Value>,
        outbound: Outbound,
    ) -> Self {
        Self {
            context,
            inbound: inbound.into_iter().collect(),
            outbound,
        }
    }

    /// Messages sent so far into a buffered outbound.
    pub fn into_sent(self) -> Vec<serde_json::Value> {
        match self.outbound {
            Outbound::Buffer(sent) => sent,
            Outbound::Channel(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl ServerStream for CallStream {
    fn context(&self) -> &CallContext {
        &self.context
    }

    fn context_mut(&mut self) -> &mut CallContext {
        &mut self.context
    }

    async fn recv_msg(&mut self, msg: &mut dyn Message) -> Result<bool, CallError> {
        match self.inbound.pop_front() {
            Some(value) => {
                msg.merge_json(value)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn send_msg(&mut self, msg: serde_json::Value) -> Result<(), CallError> {
        match &mut self.outbound {
            Outbound::Buffer(sent) => {
                sent.push(msg);
                Ok(())
            }
            Outbound::Channel(tx) => {
                let cancel = self.context.cancellation();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(CallError::canceled("call canceled")),
                    sent = tx.send(Ok(msg)) => {
                        sent.map_err(|_| CallError::canceled("client went away"))
                    }
                }
            }
        }
    }
}
