//! Client Error Types
//!
//! Centralized error handling for the gateway engine and its collaborators.

use tokio_tungstenite::tungstenite;

/// Result alias used throughout the crate.
pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

/// Gateway client error type
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Client is closed")]
    Closed,

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl GatewayError {
    /// Protocol errors invalidate the session; everything else is assumed resumable.
    pub fn invalidates_session(&self) -> bool {
        matches!(self, GatewayError::Protocol(_))
    }
}
