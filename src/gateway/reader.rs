//! Gateway Reader
//!
//! Receives frames for one connection attempt, classifies them by opcode,
//! keeps the session record current and hands dispatches to the router.
//! The attempt ends when the transport fails, the server asks for a
//! reconnect, the heartbeat timer reports a failure, or shutdown is signalled.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use super::client::Driver;
use super::context::Context;
use super::heartbeat::{HeartbeatTimer, TimerSignal};
use super::messages::{
    invalidates_session, GatewayReceive, GatewaySend, HelloPayload, OpCode, ReadyPayload,
    ResumePayload, CLOSE_ABNORMAL, CLOSE_PROTOCOL_ERROR,
};
use super::session::Phase;
use crate::infrastructure::{Incoming, Transport};
use crate::shared::error::{GatewayError, Result};

/// Why a connection attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AttemptOutcome {
    /// The controller is tearing the client down.
    Shutdown,
    /// The server asked for a reconnect (op 7) or invalidated the session (op 9).
    Reconnect { invalidate: bool },
    /// Transport, liveness or protocol failure.
    Failed {
        code: u16,
        reason: String,
        invalidate: bool,
    },
}

impl AttemptOutcome {
    fn failed(code: u16, reason: impl Into<String>) -> Self {
        Self::Failed {
            code,
            reason: reason.into(),
            invalidate: false,
        }
    }

    fn from_error(error: &GatewayError) -> Self {
        let invalidate = error.invalidates_session();
        Self::Failed {
            code: if invalidate { CLOSE_PROTOCOL_ERROR } else { CLOSE_ABNORMAL },
            reason: error.to_string(),
            invalidate,
        }
    }
}

#[derive(Debug)]
pub(crate) struct AttemptReport {
    pub(crate) outcome: AttemptOutcome,
    /// READY or RESUMED was received during the attempt.
    pub(crate) established: bool,
}

pub(crate) struct GatewayReader<'a> {
    driver: &'a Driver,
    ctx: Context,
    transport: Arc<dyn Transport>,
    signals_tx: mpsc::UnboundedSender<TimerSignal>,
    signals: mpsc::UnboundedReceiver<TimerSignal>,
    shutdown: watch::Receiver<bool>,
    established: bool,
}

impl<'a> GatewayReader<'a> {
    pub(crate) fn new(
        driver: &'a Driver,
        transport: Arc<dyn Transport>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (signals_tx, signals) = mpsc::unbounded_channel();
        Self {
            ctx: Context::new(driver.shared.clone()),
            driver,
            transport,
            signals_tx,
            signals,
            shutdown,
            established: false,
        }
    }

    pub(crate) async fn run(mut self) -> AttemptReport {
        let outcome = self.receive_loop().await;
        tracing::debug!(outcome = ?outcome, "Gateway reader finished attempt");
        AttemptReport {
            outcome,
            established: self.established,
        }
    }

    async fn receive_loop(&mut self) -> AttemptOutcome {
        loop {
            let incoming = tokio::select! {
                biased;
                _ = self.shutdown.wait_for(|stop| *stop) => return AttemptOutcome::Shutdown,
                Some(signal) = self.signals.recv() => {
                    return match signal {
                        TimerSignal::LivenessFailure => AttemptOutcome::failed(
                            CLOSE_ABNORMAL,
                            "heartbeat acknowledgement not received",
                        ),
                        TimerSignal::SendFailed(e) => AttemptOutcome::failed(
                            CLOSE_ABNORMAL,
                            format!("heartbeat send failed: {}", e),
                        ),
                    };
                }
                incoming = self.transport.receive() => incoming,
            };

            let text = match incoming {
                Ok(Incoming::Text(text)) => text,
                Ok(Incoming::Closed(None)) => {
                    return AttemptOutcome::failed(CLOSE_ABNORMAL, "transport closed");
                }
                Ok(Incoming::Closed(Some(frame))) => {
                    tracing::info!(code = frame.code, reason = %frame.reason, "Gateway closed by server");
                    return AttemptOutcome::Failed {
                        code: frame.code,
                        invalidate: invalidates_session(frame.code),
                        reason: if frame.reason.is_empty() {
                            "closed by server".to_string()
                        } else {
                            frame.reason
                        },
                    };
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Transport receive failed");
                    return AttemptOutcome::from_error(&e);
                }
            };

            let root: Value = match serde_json::from_str(&text) {
                Ok(root) => root,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping frame that is not valid JSON");
                    continue;
                }
            };

            match self.handle_frame(&root).await {
                Ok(None) => {}
                Ok(Some(outcome)) => return outcome,
                Err(e) => {
                    tracing::warn!(error = %e, "Gateway frame handling failed");
                    return AttemptOutcome::from_error(&e);
                }
            }
        }
    }

    async fn handle_frame(&mut self, root: &Value) -> Result<Option<AttemptOutcome>> {
        let frame = GatewayReceive::from_tree(root)
            .ok_or_else(|| GatewayError::Protocol("frame without an integer op".into()))?;

        let op = OpCode::from_u64(frame.op);
        if matches!(op, Some(OpCode::Dispatch | OpCode::HeartbeatAck))
            && self.driver.shared.session.phase() == Phase::AwaitingHello
        {
            return Err(GatewayError::Protocol(format!(
                "opcode {} received before hello",
                frame.op
            )));
        }

        match op {
            Some(OpCode::Dispatch) => self.on_dispatch(root, &frame)?,
            Some(OpCode::Hello) => self.on_hello(frame.d).await?,
            Some(OpCode::HeartbeatAck) => self.on_heartbeat_ack(),
            Some(OpCode::Heartbeat) => self.send_requested_heartbeat().await?,
            Some(OpCode::Reconnect) => {
                tracing::info!("Server requested reconnect");
                return Ok(Some(AttemptOutcome::Reconnect { invalidate: false }));
            }
            Some(OpCode::InvalidSession) => {
                tracing::info!(resumable = ?frame.d, "Server invalidated the session");
                return Ok(Some(AttemptOutcome::Reconnect { invalidate: true }));
            }
            _ => {
                tracing::debug!(op = frame.op, "Ignoring unexpected opcode");
            }
        }

        Ok(None)
    }

    async fn on_hello(&mut self, data: Option<&Value>) -> Result<()> {
        let hello: HelloPayload = data
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| GatewayError::Protocol(format!("malformed hello: {}", e)))?
            .ok_or_else(|| GatewayError::Protocol("hello without heartbeat interval".into()))?;

        let session = &self.driver.shared.session;
        session.arm_heartbeat(hello.heartbeat_interval)?;
        if session.phase() != Phase::AwaitingHello {
            return Err(GatewayError::Protocol(format!(
                "hello received while {}",
                session.phase()
            )));
        }

        let timer = HeartbeatTimer::spawn(
            self.driver.shared.clone(),
            self.transport.clone(),
            std::time::Duration::from_millis(hello.heartbeat_interval),
            self.signals_tx.clone(),
            self.shutdown.clone(),
        );
        if let Some(previous) = self.driver.heartbeat.lock().replace(timer) {
            previous.abort();
        }

        let frame = match session.resume_point() {
            Some((session_id, seq)) => {
                tracing::info!(session_id = %session_id, seq, "Resuming session");
                GatewaySend::resume(&ResumePayload {
                    token: self.driver.identify.token.clone(),
                    session_id,
                    seq,
                })?
            }
            None => {
                tracing::info!(intents = self.driver.identify.intents, "Identifying");
                GatewaySend::identify(&self.driver.identify)?
            }
        };
        self.transport.send(frame.to_json()?).await?;
        session.transition(Phase::Identified);
        Ok(())
    }

    fn on_heartbeat_ack(&self) {
        let change = self.driver.shared.session.record_ack(Instant::now());
        tracing::trace!("Heartbeat acknowledged");
        if let Some(change) = change {
            self.driver
                .router
                .latency_updated(&self.ctx, change.old, change.new);
        }
    }

    async fn send_requested_heartbeat(&self) -> Result<()> {
        let sequence = self.driver.shared.session.force_heartbeat(Instant::now());
        tracing::debug!(sequence = ?sequence, "Server requested heartbeat");
        self.transport
            .send(GatewaySend::heartbeat(sequence).to_json()?)
            .await
    }

    fn on_dispatch(&mut self, root: &Value, frame: &GatewayReceive<'_>) -> Result<()> {
        let session = &self.driver.shared.session;
        if let Some(sequence) = frame.s {
            session.record_sequence(sequence);
        }

        let label = frame
            .t
            .ok_or_else(|| GatewayError::Protocol("dispatch without an event type".into()))?;
        tracing::trace!(dispatch = label, sequence = ?frame.s, "Dispatch received");

        match label {
            "READY" => {
                let ready: ReadyPayload = frame
                    .d
                    .cloned()
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(|e| GatewayError::Protocol(format!("malformed READY: {}", e)))?
                    .ok_or_else(|| GatewayError::Protocol("READY without payload".into()))?;

                tracing::info!(
                    session_id = %ready.session_id,
                    user = %ready.user,
                    "Gateway session ready"
                );
                session.set_session_id(ready.session_id);
                session.set_resume_url(ready.resume_gateway_url);
                self.driver.shared.set_current_user(ready.user);
                self.establish();
            }
            "RESUMED" => {
                tracing::info!(sequence = ?session.sequence(), "Gateway session resumed");
                self.establish();
            }
            _ => self.driver.router.dispatch(&self.ctx, label, frame.d, root),
        }
        Ok(())
    }

    fn establish(&mut self) {
        if self.driver.shared.session.transition(Phase::Connected) {
            self.established = true;
            self.driver.router.connected(&self.ctx);
        }
    }
}
