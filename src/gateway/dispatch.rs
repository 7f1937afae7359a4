//! Dispatch Router
//!
//! Maps inbound events to the caller's [`EventHandler`]. Every callback runs
//! synchronously on the reader task and borrows its payload only for the
//! duration of the call.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use super::context::Context;
use crate::domain::Message;

/// Dispatch label of the message-receive event.
pub const MESSAGE_CREATE: &str = "MESSAGE_CREATE";

/// What the client should do after a connection error was reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorDecision {
    /// Escalate to the default policy: reconnect.
    #[default]
    Reconnect,
    /// Stop here and close the client.
    Close,
}

/// Caller-supplied event callbacks. Every method has a no-op default, so an
/// implementor only overrides the events it cares about. Callbacks run on the
/// reader task and must not block for long.
pub trait EventHandler: Send + Sync + 'static {
    /// The session is identified (or resumed) and events are flowing.
    fn connected(&self, _ctx: &Context) {}

    /// A dispatch whose type the client does not model. `raw` is the whole
    /// inbound frame, unmodified.
    fn unhandled_dispatch(&self, _ctx: &Context, _dispatch: &str, _raw: &Value) {}

    /// The connection failed with `code` and `reason`. The return value decides
    /// whether the client reconnects.
    fn connection_error(&self, _ctx: &Context, _code: u16, _reason: &str) -> ErrorDecision {
        ErrorDecision::Reconnect
    }

    /// The measured round-trip time (milliseconds) changed.
    fn latency_updated(&self, _ctx: &Context, _old: f64, _new: f64) {}

    /// A message was posted in a channel the client can see.
    fn message_receive(&self, _ctx: &Context, _message: &Message) {}
}

/// Handler that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl EventHandler for NoopHandler {}

/// Routes classified events to the registered handler.
#[derive(Clone)]
pub struct DispatchRouter {
    handler: Arc<dyn EventHandler>,
}

impl DispatchRouter {
    pub fn new(handler: Arc<dyn EventHandler>) -> Self {
        Self { handler }
    }

    pub fn connected(&self, ctx: &Context) {
        self.handler.connected(ctx);
    }

    pub fn connection_error(&self, ctx: &Context, code: u16, reason: &str) -> ErrorDecision {
        let decision = self.handler.connection_error(ctx, code, reason);
        tracing::debug!(code, reason, ?decision, "Connection error reported");
        decision
    }

    pub fn latency_updated(&self, ctx: &Context, old: f64, new: f64) {
        self.handler.latency_updated(ctx, old, new);
    }

    /// Route one dispatch frame. `MESSAGE_CREATE` frames matching the message
    /// shape go to `message_receive`; everything else goes to `unhandled_dispatch`.
    pub fn dispatch(&self, ctx: &Context, label: &str, data: Option<&Value>, raw: &Value) {
        if label == MESSAGE_CREATE {
            match data.map(|d| Message::deserialize(d)) {
                Some(Ok(message)) => {
                    tracing::trace!(
                        channel_id = %message.channel_id,
                        message_id = %message.message_id,
                        "Message received"
                    );
                    self.handler.message_receive(ctx, &message);
                    return;
                }
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "MESSAGE_CREATE did not match the message shape");
                }
                None => {}
            }
        }

        tracing::trace!(dispatch = label, "Unhandled dispatch");
        self.handler.unhandled_dispatch(ctx, label, raw);
    }
}
