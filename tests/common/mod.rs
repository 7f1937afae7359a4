//! Shared test utilities: an in-memory scripted gateway, a recording event
//! handler and a recording REST collaborator.

#![allow(dead_code)]

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};

use gateway_client::gateway::{GatewayClient, GatewayConfig, ReconnectPolicy};
use gateway_client::infrastructure::transport::WsTransport;
use gateway_client::infrastructure::{CloseFrame, Connector, Incoming, RestApi, Transport};
use gateway_client::{Context, ErrorDecision, EventHandler, GatewayError, Message, Result, Snowflake, UserInfo};

pub const TEST_TOKEN: &str = "test-token";

/// Generous virtual-time bound for waiting on the client.
pub const WAIT: Duration = Duration::from_secs(300);

// --- Transport ---

/// Client end of one scripted connection.
pub struct ScriptedTransport {
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Incoming>>,
    sent: mpsc::UnboundedSender<Value>,
    closed: watch::Sender<bool>,
    pub close_calls: AtomicUsize,
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, frame: String) -> Result<()> {
        if *self.closed.borrow() {
            return Err(GatewayError::Transport("transport closed".into()));
        }
        let value = serde_json::from_str(&frame)?;
        self.sent
            .send(value)
            .map_err(|_| GatewayError::Transport("server gone".into()))
    }

    async fn receive(&self) -> Result<Incoming> {
        let mut closed = self.closed.subscribe();
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            frame = inbound.recv() => Ok(frame.unwrap_or(Incoming::Closed(None))),
            _ = closed.wait_for(|closed| *closed) => Ok(Incoming::Closed(None)),
        }
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.send_replace(true);
    }
}

/// Server end of one scripted connection.
pub struct ServerConn {
    inbound: mpsc::UnboundedSender<Incoming>,
    sent: mpsc::UnboundedReceiver<Value>,
    pub transport: Arc<ScriptedTransport>,
}

impl ServerConn {
    pub fn push(&self, frame: Value) {
        let _ = self.inbound.send(Incoming::Text(frame.to_string()));
    }

    pub fn push_raw(&self, text: &str) {
        let _ = self.inbound.send(Incoming::Text(text.to_string()));
    }

    pub fn hello(&self, heartbeat_interval: u64) {
        self.push(json!({"op": 10, "d": {"heartbeat_interval": heartbeat_interval}, "s": null, "t": null}));
    }

    pub fn ack(&self) {
        self.push(json!({"op": 11, "d": null}));
    }

    pub fn dispatch(&self, sequence: u64, event: &str, data: Value) {
        self.push(json!({"op": 0, "s": sequence, "t": event, "d": data}));
    }

    pub fn ready(&self, sequence: u64, session_id: &str) {
        self.dispatch(
            sequence,
            "READY",
            json!({
                "v": 10,
                "user": {"id": "1000", "username": "bot", "discriminator": "0001"},
                "session_id": session_id,
                "guilds": []
            }),
        );
    }

    pub fn message(&self, sequence: u64, content: &str) {
        self.dispatch(
            sequence,
            "MESSAGE_CREATE",
            json!({
                "id": "500",
                "channel_id": "600",
                "content": content,
                "author": {"id": "700", "username": "nelly", "discriminator": "1337"}
            }),
        );
    }

    /// Drop the connection without a close frame.
    pub fn close_abruptly(&self) {
        let _ = self.inbound.send(Incoming::Closed(None));
    }

    pub fn close_with(&self, code: u16, reason: &str) {
        let _ = self.inbound.send(Incoming::Closed(Some(CloseFrame {
            code,
            reason: reason.to_string(),
        })));
    }

    /// Next frame the client sent on this connection.
    pub async fn next_sent(&mut self) -> Value {
        tokio::time::timeout(WAIT, self.sent.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client transport dropped")
    }

    /// Next frame, asserting its opcode.
    pub async fn expect_op(&mut self, op: u64) -> Value {
        let frame = self.next_sent().await;
        assert_eq!(frame["op"], op, "unexpected frame {}", frame);
        frame
    }

    /// Frames already sent and not yet read.
    pub fn drain_sent(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.sent.try_recv() {
            frames.push(frame);
        }
        frames
    }

    pub fn is_closed(&self) -> bool {
        *self.transport.closed.borrow()
    }
}

/// Hands every opened connection to the test through a channel.
pub struct ScriptedConnector {
    connections: mpsc::UnboundedSender<ServerConn>,
    pub opens: AtomicUsize,
    /// Endpoint passed to every open, in order.
    pub endpoints: Mutex<Vec<String>>,
    /// Number of upcoming opens that fail.
    pub fail_opens: AtomicUsize,
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn open(&self, endpoint: &str) -> Result<Arc<dyn Transport>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.endpoints.lock().push(endpoint.to_string());
        let failing = self
            .fail_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(GatewayError::Transport("connection refused".into()));
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        let transport = Arc::new(ScriptedTransport {
            inbound: tokio::sync::Mutex::new(inbound_rx),
            sent: sent_tx,
            closed,
            close_calls: AtomicUsize::new(0),
        });
        let _ = self.connections.send(ServerConn {
            inbound: inbound_tx,
            sent: sent_rx,
            transport: transport.clone(),
        });
        Ok(transport)
    }
}

/// Real WebSocket transport over a peer that sends hello and then stops
/// reading and writing, leaving every send pending.
pub struct StalledSocket {
    greeted: bool,
}

impl futures::Stream for StalledSocket {
    type Item = std::result::Result<WsMessage, tungstenite::Error>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        if self.greeted {
            return Poll::Pending;
        }
        self.greeted = true;
        let hello = json!({"op": 10, "d": {"heartbeat_interval": 41250}});
        Poll::Ready(Some(Ok(WsMessage::Text(hello.to_string()))))
    }
}

impl futures::Sink<WsMessage> for StalledSocket {
    type Error = tungstenite::Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Pending
    }

    fn start_send(self: Pin<&mut Self>, _item: WsMessage) -> std::result::Result<(), Self::Error> {
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Pending
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Pending
    }
}

pub struct StalledConnector;

#[async_trait]
impl Connector for StalledConnector {
    async fn open(&self, _endpoint: &str) -> Result<Arc<dyn Transport>> {
        Ok(Arc::new(WsTransport::new(StalledSocket { greeted: false })))
    }
}

// --- Handler ---

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connected,
    Unhandled(String, Value),
    ConnectionError(u16, String),
    Latency(f64, f64),
    Message(Message),
}

pub struct RecordingHandler {
    events: mpsc::UnboundedSender<Event>,
    pub decision: Mutex<ErrorDecision>,
}

impl EventHandler for RecordingHandler {
    fn connected(&self, _ctx: &Context) {
        let _ = self.events.send(Event::Connected);
    }

    fn unhandled_dispatch(&self, _ctx: &Context, dispatch: &str, raw: &Value) {
        let _ = self.events.send(Event::Unhandled(dispatch.to_string(), raw.clone()));
    }

    fn connection_error(&self, _ctx: &Context, code: u16, reason: &str) -> ErrorDecision {
        let _ = self.events.send(Event::ConnectionError(code, reason.to_string()));
        *self.decision.lock()
    }

    fn latency_updated(&self, _ctx: &Context, old: f64, new: f64) {
        let _ = self.events.send(Event::Latency(old, new));
    }

    fn message_receive(&self, _ctx: &Context, message: &Message) {
        let _ = self.events.send(Event::Message(message.clone()));
    }
}

// --- REST ---

#[derive(Default)]
pub struct RecordingRest {
    pub messages: Mutex<Vec<(Snowflake, String)>>,
}

#[async_trait]
impl RestApi for RecordingRest {
    async fn create_message(&self, channel_id: Snowflake, content: &str) -> Result<()> {
        self.messages.lock().push((channel_id, content.to_string()));
        Ok(())
    }

    async fn get_user(&self, user_id: Snowflake) -> Result<UserInfo> {
        Ok(UserInfo::new(user_id, 42, "looked-up"))
    }
}

// --- Harness ---

pub struct TestGateway {
    pub client: GatewayClient,
    pub connector: Arc<ScriptedConnector>,
    pub handler: Arc<RecordingHandler>,
    pub rest: Arc<RecordingRest>,
    connections: mpsc::UnboundedReceiver<ServerConn>,
    events: mpsc::UnboundedReceiver<Event>,
}

pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        url: "ws://gateway.test".into(),
        reconnect: ReconnectPolicy {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            max_attempts: None,
        },
        shutdown_timeout: Duration::from_secs(1),
        ..GatewayConfig::default()
    }
}

impl TestGateway {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: GatewayConfig) -> Self {
        let (conn_tx, connections) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let connector = Arc::new(ScriptedConnector {
            connections: conn_tx,
            opens: AtomicUsize::new(0),
            endpoints: Mutex::new(Vec::new()),
            fail_opens: AtomicUsize::new(0),
        });
        let handler = Arc::new(RecordingHandler {
            events: events_tx,
            decision: Mutex::new(ErrorDecision::Reconnect),
        });
        let rest = Arc::new(RecordingRest::default());

        let client = GatewayClient::builder(TEST_TOKEN)
            .config(config)
            .connector(connector.clone())
            .rest(rest.clone())
            .shared_handler(handler.clone())
            .build()
            .expect("client builds");

        Self {
            client,
            connector,
            handler,
            rest,
            connections,
            events,
        }
    }

    /// Wait for the client to open its next transport.
    pub async fn next_connection(&mut self) -> ServerConn {
        tokio::time::timeout(WAIT, self.connections.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }

    pub async fn next_event(&mut self) -> Event {
        tokio::time::timeout(WAIT, self.events.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("handler dropped")
    }

    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn opens(&self) -> usize {
        self.connector.opens.load(Ordering::SeqCst)
    }

    /// Connect and run hello/identify/READY on the first connection.
    pub async fn connect_ready(&mut self, heartbeat_interval: u64) -> ServerConn {
        self.client.connect().await.expect("connect");
        let mut conn = self.next_connection().await;
        conn.hello(heartbeat_interval);
        conn.expect_op(2).await;
        conn.ready(1, "session-1");
        assert_eq!(self.next_event().await, Event::Connected);
        conn
    }
}
