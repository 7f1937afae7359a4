//! Inbound message event.
//!
//! Built by the gateway reader from a `MESSAGE_CREATE` dispatch, handed to
//! the message callback once and then dropped.

use serde::{Deserialize, Serialize};

use super::UserInfo;
use crate::domain::value_objects::Snowflake;

/// A message received in a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Channel the message was posted in
    pub channel_id: Snowflake,

    /// Snowflake ID of the message
    #[serde(rename = "id")]
    pub message_id: Snowflake,

    /// Text payload
    #[serde(default)]
    pub content: String,

    /// Identity of the sender
    #[serde(rename = "author")]
    pub sender: UserInfo,
}

impl Message {
    /// Whether the text starts with the given command prefix.
    pub fn is_command(&self, command: &str) -> bool {
        self.content
            .strip_prefix(command)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
    }
}
