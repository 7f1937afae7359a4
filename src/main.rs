//! # Gateway Client
//!
//! A small bot built on the gateway client library.
//!
//! This is the application entry point that initializes:
//! - Tracing/logging subsystem
//! - Configuration loading
//! - The gateway client, connected until Ctrl-C

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info, warn};

use gateway_client::config::Settings;
use gateway_client::{Context, ErrorDecision, EventHandler, GatewayClient, Message};

/// Logs gateway events and answers `!ping`.
struct PingBot;

impl EventHandler for PingBot {
    fn connected(&self, ctx: &Context) {
        match ctx.current_user() {
            Some(user) => info!(user = %user, "Bot connected"),
            None => info!("Bot connected"),
        }
    }

    fn unhandled_dispatch(&self, _ctx: &Context, dispatch: &str, _raw: &serde_json::Value) {
        info!(dispatch, "Unhandled dispatch");
    }

    fn connection_error(&self, _ctx: &Context, code: u16, reason: &str) -> ErrorDecision {
        error!(code, reason, "Connection error");
        ErrorDecision::Reconnect
    }

    fn latency_updated(&self, _ctx: &Context, old: f64, new: f64) {
        info!(old_ms = old, new_ms = new, "Latency updated");
    }

    fn message_receive(&self, ctx: &Context, message: &Message) {
        let age_ms = (Utc::now() - message.message_id.created_at()).num_milliseconds();
        info!(
            channel_id = %message.channel_id,
            sender = %message.sender,
            content = %message.content,
            age_ms,
            "Message received"
        );

        let from_self = ctx
            .current_user()
            .is_some_and(|me| me.id() == message.sender.id());
        if from_self || !message.is_command("!ping") {
            return;
        }

        let ctx = ctx.clone();
        let channel_id = message.channel_id;
        tokio::spawn(async move {
            let reply = format!("pong ({:.0} ms gateway, {} ms delivery)", ctx.latency(), age_ms);
            if let Err(e) = ctx.send_message(channel_id, &reply).await {
                warn!(error = %e, "Failed to answer ping");
            }
        });
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from environment and config files
    let settings = Settings::load()?;

    // Initialize tracing subscriber for structured logging
    if settings.environment == "production" {
        gateway_client::telemetry::init_json_tracing();
    } else {
        gateway_client::telemetry::init_tracing();
    }

    info!("Starting Gateway Client...");
    info!(
        gateway = %settings.gateway.url,
        intents = settings.gateway.intents,
        environment = %settings.environment,
        "Configuration loaded"
    );

    let client = GatewayClient::builder(settings.token.clone())
        .config(settings.gateway_config())
        .rest_base_url(settings.rest.base_url.clone())
        .user_agent(settings.rest.user_agent.clone())
        .handler(PingBot)
        .build()?;

    client.connect().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    client.close().await;

    Ok(())
}
