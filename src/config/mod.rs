//! # Configuration Module
//!
//! This module handles client configuration loading and management.
//! Configuration can be loaded from:
//! - Environment variables (prefixed with APP__, plus DISCORD_TOKEN and GATEWAY_URL)
//! - Configuration files (config/default.toml, config/{environment}.toml)
//! - .env files (via dotenvy)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gateway_client::config::Settings;
//!
//! let settings = Settings::load()?;
//! println!("Connecting to {}", settings.gateway.url);
//! ```

mod settings;

pub use settings::*;
