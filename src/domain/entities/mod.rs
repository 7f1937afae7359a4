//! # Domain Entities
//!
//! Payload types the gateway engine hands to callers.
//!
//! - **UserInfo**: immutable identity snapshot (id, discriminator, name)
//! - **Message**: a message-receive event (channel, id, text, sender)

mod message;
mod user;

pub use message::Message;
pub use user::UserInfo;
