//! Gateway Connection Engine
//!
//! Client side of the push-event gateway: session bookkeeping, heartbeating,
//! frame classification, event routing and the connect/reconnect lifecycle.

pub mod client;
pub mod context;
pub mod dispatch;
mod heartbeat;
pub mod messages;
mod reader;
pub mod reconnect;
pub mod session;

pub use client::{GatewayClient, GatewayClientBuilder, GatewayConfig, DEFAULT_GATEWAY_URL, DEFAULT_INTENTS};
pub use context::Context;
pub use dispatch::{DispatchRouter, ErrorDecision, EventHandler, NoopHandler};
pub use messages::{OpCode, CLOSE_ABNORMAL, CLOSE_PROTOCOL_ERROR, CLOSE_RECONNECT_EXHAUSTED};
pub use reconnect::ReconnectPolicy;
pub use session::{Phase, SessionState};
