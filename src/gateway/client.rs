//! Connection Controller
//!
//! Public entry point of the engine. A [`GatewayClient`] owns the session
//! record and the background tasks of one connection: the reader task, which
//! also drives reconnects, and the heartbeat task it arms on hello.
//!
//! ```text
//! Disconnected -> Connecting -> AwaitingHello -> Identified -> Connected
//!                     ^                                           |
//!                     +------------- Reconnecting <---------------+
//!
//! any phase --disconnect()--> Closing -> Disconnected (terminal)
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::context::{Context, Shared};
use super::dispatch::{DispatchRouter, ErrorDecision, EventHandler, NoopHandler};
use super::heartbeat::HeartbeatHandle;
use super::messages::{
    is_fatal_close_code, IdentifyPayload, IdentifyProperties, CLOSE_ABNORMAL,
    CLOSE_RECONNECT_EXHAUSTED,
};
use super::reader::{AttemptOutcome, AttemptReport, GatewayReader};
use super::reconnect::ReconnectPolicy;
use super::session::Phase;
use crate::domain::{Snowflake, UserInfo};
use crate::infrastructure::{Connector, HttpRestApi, RestApi, Transport, WsConnector, DEFAULT_API_BASE};
use crate::shared::error::{GatewayError, Result};

/// Default gateway endpoint.
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg";

/// GUILDS | GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT
pub const DEFAULT_INTENTS: u64 = (1 << 0) | (1 << 9) | (1 << 12) | (1 << 15);

/// Engine-level settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Gateway endpoint (version and encoding are appended when absent)
    pub url: String,
    /// Gateway intents bitfield sent with identify
    pub intents: u64,
    /// Member count above which guilds are sent without offline members
    pub large_threshold: u8,
    /// Connection properties sent with identify
    pub properties: IdentifyProperties,
    /// Retry behaviour after a lost connection
    pub reconnect: ReconnectPolicy,
    /// Bound on how long teardown waits for each background task
    pub shutdown_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_GATEWAY_URL.to_string(),
            intents: DEFAULT_INTENTS,
            large_threshold: 50,
            properties: IdentifyProperties::default(),
            reconnect: ReconnectPolicy::default(),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Builder for [`GatewayClient`].
pub struct GatewayClientBuilder {
    token: String,
    config: GatewayConfig,
    handler: Arc<dyn EventHandler>,
    connector: Option<Arc<dyn Connector>>,
    rest: Option<Arc<dyn RestApi>>,
    rest_base_url: String,
    user_agent: String,
}

impl GatewayClientBuilder {
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    pub fn handler<H: EventHandler>(mut self, handler: H) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    pub fn shared_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Replace the WebSocket transport.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Replace the REST collaborator.
    pub fn rest(mut self, rest: Arc<dyn RestApi>) -> Self {
        self.rest = Some(rest);
        self
    }

    pub fn rest_base_url(mut self, url: impl Into<String>) -> Self {
        self.rest_base_url = url.into();
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Allocate the client in the `Disconnected` phase. Performs no I/O.
    pub fn build(self) -> Result<GatewayClient> {
        let rest = match self.rest {
            Some(rest) => rest,
            None => Arc::new(HttpRestApi::new(
                &self.token,
                self.rest_base_url,
                &self.user_agent,
            )?),
        };
        let shared = Arc::new(Shared::new(rest));
        let identify = IdentifyPayload {
            token: self.token,
            properties: self.config.properties.clone(),
            intents: self.config.intents,
            large_threshold: self.config.large_threshold,
        };
        let (shutdown, _) = watch::channel(false);

        Ok(GatewayClient {
            driver: Arc::new(Driver {
                shared: shared.clone(),
                connector: self.connector.unwrap_or_else(|| Arc::new(WsConnector)),
                router: DispatchRouter::new(self.handler),
                config: self.config,
                identify,
                transport: Mutex::new(None),
                heartbeat: Mutex::new(None),
            }),
            shared,
            lifecycle: tokio::sync::Mutex::new(Lifecycle::Idle),
            shutdown,
        })
    }
}

enum Lifecycle {
    /// Created, never connected
    Idle,
    /// Reader task running (or finished on its own after a close decision)
    Running(JoinHandle<()>),
    /// Torn down; terminal
    Closed,
}

/// Client for one gateway connection.
pub struct GatewayClient {
    shared: Arc<Shared>,
    driver: Arc<Driver>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    shutdown: watch::Sender<bool>,
}

impl GatewayClient {
    /// Create a client with the default transport, REST collaborator and config.
    pub fn new<H: EventHandler>(handler: H, token: impl Into<String>) -> Result<Self> {
        Self::builder(token).handler(handler).build()
    }

    pub fn builder(token: impl Into<String>) -> GatewayClientBuilder {
        GatewayClientBuilder {
            token: token.into(),
            config: GatewayConfig::default(),
            handler: Arc::new(NoopHandler),
            connector: None,
            rest: None,
            rest_base_url: DEFAULT_API_BASE.to_string(),
            user_agent: format!(
                "DiscordBot ({}, {})",
                env!("CARGO_PKG_REPOSITORY"),
                env!("CARGO_PKG_VERSION")
            ),
        }
    }

    /// Start connecting in the background. A no-op while already connected or
    /// connecting; fails with [`GatewayError::Closed`] once the client was
    /// disconnected or gave up reconnecting.
    pub async fn connect(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        match &*lifecycle {
            Lifecycle::Closed => return Err(GatewayError::Closed),
            Lifecycle::Running(reader) if reader.is_finished() => return Err(GatewayError::Closed),
            Lifecycle::Running(_) => return Ok(()),
            Lifecycle::Idle => {}
        }

        self.shared.session.transition(Phase::Connecting);
        tracing::info!(url = %self.driver.config.url, "Connecting to gateway");

        let driver = self.driver.clone();
        let shutdown = self.shutdown.subscribe();
        *lifecycle = Lifecycle::Running(tokio::spawn(driver.run(shutdown)));
        Ok(())
    }

    /// Stop heartbeating, close the transport and join both background tasks
    /// (each bounded by `shutdown_timeout`). Safe from any phase; concurrent
    /// calls resolve to a single teardown and all return after it completes.
    pub async fn disconnect(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let previous = std::mem::replace(&mut *lifecycle, Lifecycle::Closed);
        if matches!(previous, Lifecycle::Closed) {
            return;
        }

        tracing::info!(phase = %self.shared.session.phase(), "Disconnecting from gateway");
        self.shared.mark_closed();
        self.shared.session.set_heartbeating(false);
        self.shared.session.transition(Phase::Closing);
        let _ = self.shutdown.send(true);
        self.driver.close_transport().await;

        if let Lifecycle::Running(mut reader) = previous {
            let timeout = self.driver.config.shutdown_timeout;
            if tokio::time::timeout(timeout, &mut reader).await.is_err() {
                tracing::warn!("Gateway reader did not stop in time, aborting");
                reader.abort();
                let _ = reader.await;
            }
        }
        self.driver.stop_heartbeat().await;
        self.shared.session.disarm_heartbeat();
        self.shared.session.transition(Phase::Disconnected);

        tracing::info!("Disconnected from gateway");
    }

    /// Disconnect (if still running) and release the client. Both background
    /// tasks are joined before this returns.
    pub async fn close(self) {
        self.disconnect().await;
    }

    /// Handle onto this client's shared state, as passed to callbacks.
    pub fn context(&self) -> Context {
        Context::new(self.shared.clone())
    }

    pub fn phase(&self) -> Phase {
        self.shared.session.phase()
    }

    pub fn sequence(&self) -> Option<u64> {
        self.shared.session.sequence()
    }

    pub fn latency(&self) -> f64 {
        self.shared.session.latency()
    }

    /// Post a message through the REST collaborator.
    pub async fn send_message(&self, channel_id: Snowflake, content: &str) -> Result<()> {
        self.context().send_message(channel_id, content).await
    }

    /// Look a user up by id through the REST collaborator.
    pub async fn get_user(&self, user_id: Snowflake) -> Result<UserInfo> {
        self.context().get_user(user_id).await
    }
}

impl Drop for GatewayClient {
    fn drop(&mut self) {
        if let Lifecycle::Running(reader) = self.lifecycle.get_mut() {
            tracing::warn!("GatewayClient dropped without close(), aborting background tasks");
            self.shared.mark_closed();
            self.shared.session.set_heartbeating(false);
            let _ = self.shutdown.send(true);
            reader.abort();
            if let Some(heartbeat) = self.driver.heartbeat.lock().take() {
                heartbeat.abort();
            }
        }
    }
}

/// Everything the reader task needs; shared between the controller and the task.
pub(crate) struct Driver {
    pub(crate) shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    pub(crate) router: DispatchRouter,
    config: GatewayConfig,
    pub(crate) identify: IdentifyPayload,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    pub(crate) heartbeat: Mutex<Option<HeartbeatHandle>>,
}

impl Driver {
    /// Reader task body: one gateway reader per attempt, reconnecting per policy.
    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let ctx = Context::new(self.shared.clone());
        let session = &self.shared.session;
        let policy = &self.config.reconnect;
        let mut failures: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }
            session.transition(Phase::Connecting);

            let report = match self.open(&mut shutdown).await {
                Some(Ok(transport)) => {
                    session.transition(Phase::AwaitingHello);
                    GatewayReader::new(&self, transport, shutdown.clone()).run().await
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Failed to open gateway transport");
                    AttemptReport {
                        outcome: AttemptOutcome::Failed {
                            code: CLOSE_ABNORMAL,
                            reason: format!("failed to open transport: {}", e),
                            invalidate: false,
                        },
                        established: false,
                    }
                }
                None => break,
            };

            self.end_attempt().await;
            if report.established {
                failures = 0;
            }
            if *shutdown.borrow() {
                break;
            }

            match report.outcome {
                AttemptOutcome::Shutdown => break,
                AttemptOutcome::Reconnect { invalidate } => {
                    if invalidate {
                        session.invalidate();
                    }
                }
                AttemptOutcome::Failed {
                    code,
                    reason,
                    invalidate,
                } => {
                    let decision = self.router.connection_error(&ctx, code, &reason);
                    if decision == ErrorDecision::Close || is_fatal_close_code(code) {
                        tracing::info!(code, reason = %reason, "Connection closed for good");
                        session.transition(Phase::Closing);
                        break;
                    }
                    if invalidate {
                        session.invalidate();
                    }
                }
            }

            session.transition(Phase::Reconnecting);
            failures += 1;
            if !policy.should_reconnect(failures) {
                tracing::warn!(attempts = failures - 1, "Reconnect attempts exhausted");
                self.router.connection_error(
                    &ctx,
                    CLOSE_RECONNECT_EXHAUSTED,
                    "reconnect attempts exhausted",
                );
                session.transition(Phase::Closing);
                break;
            }

            let delay = policy.jittered_delay(failures);
            tracing::info!(
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                resume = session.resume_point().is_some(),
                "Reconnecting to gateway"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
        }

        tracing::debug!("Gateway driver stopped");
    }

    /// Open a transport and hand it to the controller's slot. `None` on shutdown.
    async fn open(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<Result<Arc<dyn Transport>>> {
        let session = &self.shared.session;
        let endpoint = session
            .resume_point()
            .and_then(|_| session.resume_url())
            .unwrap_or_else(|| self.config.url.clone());
        let opened = tokio::select! {
            opened = self.connector.open(&endpoint) => opened,
            _ = shutdown.wait_for(|stop| *stop) => return None,
        };
        Some(opened.map(|transport| {
            *self.transport.lock() = Some(transport.clone());
            transport
        }))
    }

    async fn end_attempt(&self) {
        self.stop_heartbeat().await;
        self.close_transport().await;
        self.shared.session.disarm_heartbeat();
    }

    pub(crate) async fn close_transport(&self) {
        let transport = self.transport.lock().take();
        if let Some(transport) = transport {
            let timeout = self.config.shutdown_timeout;
            if tokio::time::timeout(timeout, transport.close()).await.is_err() {
                tracing::warn!("Gateway transport did not close in time, dropping it");
            }
        }
    }

    pub(crate) async fn stop_heartbeat(&self) {
        let heartbeat = self.heartbeat.lock().take();
        if let Some(heartbeat) = heartbeat {
            heartbeat.stop(self.config.shutdown_timeout).await;
        }
    }
}
