//! # Infrastructure Layer
//!
//! External collaborators of the gateway engine, each behind a trait:
//!
//! - **transport**: WebSocket frame send/receive/close
//! - **rest**: outbound REST actions and identity lookup

pub mod rest;
pub mod transport;

pub use rest::{HttpRestApi, RestApi, DEFAULT_API_BASE};
pub use transport::{gateway_url, CloseFrame, Connector, Incoming, Transport, WsConnector};
