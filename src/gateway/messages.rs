//! Gateway Message Types
//!
//! Discord-compatible gateway frame formats, seen from the client side.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::UserInfo;

/// Abnormal closure: the transport went away without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// The peer violated the gateway protocol.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
/// The reconnect policy gave up.
pub const CLOSE_RECONNECT_EXHAUSTED: u16 = 4900;

/// Server close codes after which reconnecting can never succeed.
pub fn is_fatal_close_code(code: u16) -> bool {
    matches!(code, 4004 | 4010..=4014)
}

/// Server close codes that end the session; the next attempt must identify.
pub fn invalidates_session(code: u16) -> bool {
    matches!(code, 4007 | 4009)
}

/// Gateway opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Event dispatch
    Dispatch = 0,
    /// Heartbeat
    Heartbeat = 1,
    /// Identify
    Identify = 2,
    /// Presence update
    PresenceUpdate = 3,
    /// Resume
    Resume = 6,
    /// Reconnect
    Reconnect = 7,
    /// Invalid session
    InvalidSession = 9,
    /// Hello
    Hello = 10,
    /// Heartbeat ACK
    HeartbeatAck = 11,
}

impl OpCode {
    pub fn from_u64(op: u64) -> Option<Self> {
        Some(match op {
            0 => Self::Dispatch,
            1 => Self::Heartbeat,
            2 => Self::Identify,
            3 => Self::PresenceUpdate,
            6 => Self::Resume,
            7 => Self::Reconnect,
            9 => Self::InvalidSession,
            10 => Self::Hello,
            11 => Self::HeartbeatAck,
            _ => return None,
        })
    }
}

/// Incoming gateway frame, read by key from the parsed tree.
#[derive(Debug)]
pub struct GatewayReceive<'a> {
    pub op: u64,
    pub d: Option<&'a Value>,
    pub s: Option<u64>,
    pub t: Option<&'a str>,
}

impl<'a> GatewayReceive<'a> {
    /// Read the envelope keys. `None` when `op` is missing or not an integer.
    pub fn from_tree(root: &'a Value) -> Option<Self> {
        Some(Self {
            op: root.get("op")?.as_u64()?,
            d: root.get("d").filter(|d| !d.is_null()),
            s: root.get("s").and_then(Value::as_u64),
            t: root.get("t").and_then(Value::as_str),
        })
    }
}

/// Outgoing gateway frame
#[derive(Debug, Clone, Serialize)]
pub struct GatewaySend {
    pub op: u8,
    pub d: Value,
}

impl GatewaySend {
    /// Heartbeat carrying the last sequence number, or `null` before any dispatch.
    pub fn heartbeat(sequence: Option<u64>) -> Self {
        Self {
            op: OpCode::Heartbeat as u8,
            d: sequence.map(Value::from).unwrap_or(Value::Null),
        }
    }

    pub fn identify(payload: &IdentifyPayload) -> serde_json::Result<Self> {
        Ok(Self {
            op: OpCode::Identify as u8,
            d: serde_json::to_value(payload)?,
        })
    }

    pub fn resume(payload: &ResumePayload) -> serde_json::Result<Self> {
        Ok(Self {
            op: OpCode::Resume as u8,
            d: serde_json::to_value(payload)?,
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Hello payload (op 10)
#[derive(Debug, Deserialize)]
pub struct HelloPayload {
    pub heartbeat_interval: u64,
}

/// Ready payload (dispatch READY)
#[derive(Debug, Deserialize)]
pub struct ReadyPayload {
    pub user: UserInfo,
    pub session_id: String,
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
}

/// Identify payload (op 2)
#[derive(Debug, Clone, Serialize)]
pub struct IdentifyPayload {
    pub token: String,
    pub properties: IdentifyProperties,
    pub intents: u64,
    pub large_threshold: u8,
}

/// Identify connection properties
#[derive(Debug, Clone, Serialize)]
pub struct IdentifyProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: env!("CARGO_PKG_NAME").to_string(),
            device: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

/// Resume payload (op 6)
#[derive(Debug, Clone, Serialize)]
pub struct ResumePayload {
    pub token: String,
    pub session_id: String,
    pub seq: u64,
}
