//! Gateway Transport
//!
//! Frame-level send/receive/close over a secure WebSocket. The engine only
//! sees the [`Connector`] and [`Transport`] traits; [`WsConnector`] is the
//! `tokio-tungstenite` implementation used outside of tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::shared::error::{GatewayError, Result};

/// Gateway protocol version requested on connect.
pub const GATEWAY_VERSION: u8 = 10;

/// Upper bound on flushing the close handshake to an unresponsive peer.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close frame reported by the remote end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

/// Result of a blocking receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A complete text frame
    Text(String),
    /// The transport is gone; carries the close frame if the peer sent one
    Closed(Option<CloseFrame>),
}

/// An open, framed connection to the gateway.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one text frame.
    async fn send(&self, frame: String) -> Result<()>;

    /// Wait for the next frame. Must return [`Incoming::Closed`] promptly
    /// once [`Transport::close`] has been called.
    async fn receive(&self) -> Result<Incoming>;

    /// Close the connection and unblock any pending `receive` or `send`.
    /// Must complete in bounded time even when the peer stopped reading.
    async fn close(&self);
}

/// Opens transports to a gateway endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, endpoint: &str) -> Result<Arc<dyn Transport>>;
}

/// Append the version and encoding query when the URL carries none.
pub fn gateway_url(base: &str) -> String {
    if base.contains('?') {
        base.to_string()
    } else {
        format!(
            "{}/?v={}&encoding=json",
            base.trim_end_matches('/'),
            GATEWAY_VERSION
        )
    }
}

/// `tokio-tungstenite` connector.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, endpoint: &str) -> Result<Arc<dyn Transport>> {
        let url = gateway_url(endpoint);
        tracing::debug!(url = %url, "Opening gateway transport");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        Ok(Arc::new(WsTransport::new(ws_stream)))
    }
}

/// WebSocket transport with independently locked read and write halves, so
/// the reader can block in `receive` while the heartbeat task sends.
pub struct WsTransport<S = WsStream> {
    sink: Mutex<SplitSink<S, WsMessage>>,
    stream: Mutex<SplitStream<S>>,
    closed: watch::Sender<bool>,
}

impl<S> WsTransport<S>
where
    S: futures::Stream<Item = std::result::Result<WsMessage, tungstenite::Error>>
        + futures::Sink<WsMessage, Error = tungstenite::Error>
        + Send
        + Unpin,
{
    pub fn new(ws: S) -> Self {
        let (sink, stream) = ws.split();
        let (closed, _) = watch::channel(false);
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed,
        }
    }
}

#[async_trait]
impl<S> Transport for WsTransport<S>
where
    S: futures::Stream<Item = std::result::Result<WsMessage, tungstenite::Error>>
        + futures::Sink<WsMessage, Error = tungstenite::Error>
        + Send
        + Unpin
        + 'static,
{
    async fn send(&self, frame: String) -> Result<()> {
        let mut closed_rx = self.closed.subscribe();
        if *closed_rx.borrow_and_update() {
            return Err(GatewayError::Transport("transport closed".into()));
        }
        tracing::trace!(frame = %frame, "Sending frame");

        // A stalled peer leaves the send pending while holding the sink;
        // closing the transport releases it.
        tokio::select! {
            sent = async { self.sink.lock().await.send(WsMessage::Text(frame)).await } => {
                sent?;
                Ok(())
            }
            _ = closed_rx.wait_for(|closed| *closed) => {
                Err(GatewayError::Transport("transport closed".into()))
            }
        }
    }

    async fn receive(&self) -> Result<Incoming> {
        let mut closed_rx = self.closed.subscribe();
        if *closed_rx.borrow_and_update() {
            return Ok(Incoming::Closed(None));
        }

        let mut stream = self.stream.lock().await;
        loop {
            let next = tokio::select! {
                next = stream.next() => next,
                _ = closed_rx.wait_for(|closed| *closed) => return Ok(Incoming::Closed(None)),
            };

            match next {
                Some(Ok(WsMessage::Text(text))) => return Ok(Incoming::Text(text.to_string())),
                Some(Ok(WsMessage::Binary(bytes))) => {
                    return String::from_utf8(bytes.to_vec())
                        .map(Incoming::Text)
                        .map_err(|_| GatewayError::Protocol("non UTF-8 binary frame".into()));
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    return Ok(Incoming::Closed(frame.map(|f| CloseFrame {
                        code: u16::from(f.code),
                        reason: f.reason.to_string(),
                    })));
                }
                Some(Ok(_)) => continue,
                Some(Err(tungstenite::Error::ConnectionClosed))
                | Some(Err(tungstenite::Error::AlreadyClosed))
                | None => return Ok(Incoming::Closed(None)),
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        let closing = async {
            let mut sink = self.sink.lock().await;
            sink.close().await
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, closing).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "Error while closing transport"),
            Err(_) => tracing::warn!("Peer did not complete the close handshake, dropping it"),
        }
    }
}
