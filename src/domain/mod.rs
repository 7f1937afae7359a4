//! # Domain Layer
//!
//! Types describing what the gateway delivers, independent of how it is
//! delivered.
//!
//! ## Structure
//!
//! - **entities**: payloads handed to callbacks (UserInfo, Message)
//! - **value_objects**: immutable value types (Snowflake)

pub mod entities;
pub mod value_objects;

pub use entities::*;
pub use value_objects::*;
