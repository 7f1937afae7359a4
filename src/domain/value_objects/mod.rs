//! # Value Objects
//!
//! Immutable value types shared by entities and the gateway engine.

mod snowflake;

pub use snowflake::{Snowflake, DISCORD_EPOCH};
