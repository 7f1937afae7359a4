//! Client settings and configuration structures.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::gateway::{GatewayConfig, ReconnectPolicy, DEFAULT_GATEWAY_URL, DEFAULT_INTENTS};
use crate::infrastructure::DEFAULT_API_BASE;

/// Root configuration structure containing all client settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Bot token used for identify and REST authorization
    pub token: String,

    /// Gateway connection settings
    pub gateway: GatewaySettings,

    /// Reconnect backoff settings
    pub reconnect: ReconnectSettings,

    /// REST API settings
    pub rest: RestSettings,

    /// Current environment (development, staging, production)
    pub environment: String,
}

/// Gateway connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySettings {
    /// Gateway WebSocket URL
    pub url: String,

    /// Intents bitfield sent with identify
    pub intents: u64,

    /// Large guild threshold sent with identify (50-250)
    pub large_threshold: u8,

    /// Bound on how long disconnect waits for each background task
    pub disconnect_timeout_ms: u64,
}

/// Reconnect backoff configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectSettings {
    /// Delay before the first reconnect attempt in milliseconds
    pub initial_delay_ms: u64,

    /// Maximum delay between attempts in milliseconds
    pub max_delay_ms: u64,

    /// Exponential growth factor
    pub backoff_multiplier: f64,

    /// Consecutive failed attempts before giving up (0 = unbounded)
    pub max_attempts: u32,
}

/// REST API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RestSettings {
    /// API root URL
    pub base_url: String,

    /// User-Agent header sent with every request
    pub user_agent: String,
}

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. config/default.toml (base configuration)
    /// 2. config/{RUN_ENV}.toml (environment-specific overrides)
    /// 3. Environment variables (highest priority)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or parsed,
    /// or if the token is empty.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

        Self::builder(&environment)?
            // APP__GATEWAY__INTENTS=513 -> gateway.intents = 513
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("token", std::env::var("DISCORD_TOKEN").ok())?
            .set_override_option("gateway.url", std::env::var("GATEWAY_URL").ok())?
            .build()?
            .try_deserialize()
            .and_then(Self::validate)
    }

    /// Defaults plus the optional config files for `environment`.
    fn builder(
        environment: &str,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Ok(Config::builder()
            .set_default("environment", environment)?
            .set_default("token", "")?
            .set_default("gateway.url", DEFAULT_GATEWAY_URL)?
            .set_default("gateway.intents", DEFAULT_INTENTS)?
            .set_default("gateway.large_threshold", 50)?
            .set_default("gateway.disconnect_timeout_ms", 5000)?
            .set_default("reconnect.initial_delay_ms", 1000)?
            .set_default("reconnect.max_delay_ms", 60000)?
            .set_default("reconnect.backoff_multiplier", 2.0)?
            .set_default("reconnect.max_attempts", 0)?
            .set_default("rest.base_url", DEFAULT_API_BASE)?
            .set_default(
                "rest.user_agent",
                format!("DiscordBot ({}, {})", env!("CARGO_PKG_REPOSITORY"), env!("CARGO_PKG_VERSION")),
            )?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false)))
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.token.trim().is_empty() {
            return Err(ConfigError::Message(
                "a bot token is required (set DISCORD_TOKEN or APP__TOKEN)".into(),
            ));
        }
        if !(50..=250).contains(&self.gateway.large_threshold) {
            return Err(ConfigError::Message(format!(
                "gateway.large_threshold must be between 50 and 250, got {}",
                self.gateway.large_threshold
            )));
        }
        Ok(self)
    }

    /// Engine configuration derived from these settings.
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            url: self.gateway.url.clone(),
            intents: self.gateway.intents,
            large_threshold: self.gateway.large_threshold,
            reconnect: self.reconnect.policy(),
            shutdown_timeout: Duration::from_millis(self.gateway.disconnect_timeout_ms),
            ..GatewayConfig::default()
        }
    }
}

impl ReconnectSettings {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
            max_attempts: (self.max_attempts > 0).then_some(self.max_attempts),
        }
    }
}
