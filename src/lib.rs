//! # Gateway Client Library
//!
//! This crate provides a client engine for a Discord-compatible push-event
//! gateway:
//! - Connect, identify/resume and reconnect lifecycle
//! - Background heartbeating with liveness detection and latency tracking
//! - Opcode classification and dispatch routing to caller callbacks
//! - REST collaborators for sending messages and looking users up
//!
//! ## Module Structure
//!
//! ```text
//! gateway_client/
//! +-- config/          Configuration management
//! +-- domain/          Payload entities and value objects
//! +-- gateway/         Connection engine (session, heartbeat, reader, router, controller)
//! +-- infrastructure/  WebSocket transport and REST implementations
//! +-- shared/          Common utilities (errors)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gateway_client::gateway::{Context, EventHandler, GatewayClient};
//! use gateway_client::domain::Message;
//!
//! struct Bot;
//!
//! impl EventHandler for Bot {
//!     fn message_receive(&self, ctx: &Context, message: &Message) {
//!         println!("{}: {}", message.sender, message.content);
//!     }
//! }
//!
//! let client = GatewayClient::new(Bot, token)?;
//! client.connect().await?;
//! ```

// Configuration module
pub mod config;

// Domain layer - payload types
pub mod domain;

// Gateway connection engine
pub mod gateway;

// Infrastructure layer - transport and REST implementations
pub mod infrastructure;

// Shared utilities
pub mod shared;

// Telemetry and observability
pub mod telemetry;

pub use domain::{Message, Snowflake, UserInfo};
pub use gateway::{Context, ErrorDecision, EventHandler, GatewayClient, GatewayConfig, Phase};
pub use shared::error::{GatewayError, Result};
