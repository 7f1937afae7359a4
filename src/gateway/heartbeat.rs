//! Heartbeat Timer
//!
//! Once armed by hello, sends a heartbeat every interval measured from the
//! arming time, so processing jitter never stretches the cadence. A heartbeat
//! that is still unacknowledged when the next one is due is a liveness
//! failure: the timer reports it and stops instead of sending again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use super::context::Shared;
use super::messages::GatewaySend;
use crate::infrastructure::Transport;
use crate::shared::error::GatewayError;

/// Reported by the timer to the reader task; either one ends the attempt.
#[derive(Debug)]
pub(crate) enum TimerSignal {
    /// The previous heartbeat was not acknowledged in time.
    LivenessFailure,
    /// The transport refused a heartbeat frame.
    SendFailed(GatewayError),
}

/// Running timer for one connection attempt.
pub(crate) struct HeartbeatHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// Signal the timer and wait for it to exit, aborting after `timeout`.
    pub(crate) async fn stop(self, timeout: Duration) {
        let _ = self.stop.send(true);
        let mut task = self.task;
        if tokio::time::timeout(timeout, &mut task).await.is_err() {
            tracing::warn!("Heartbeat task did not stop in time, aborting");
            task.abort();
            let _ = task.await;
        }
    }

    pub(crate) fn abort(&self) {
        self.task.abort();
    }
}

pub(crate) struct HeartbeatTimer {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    interval: Duration,
    signals: mpsc::UnboundedSender<TimerSignal>,
    stop: watch::Receiver<bool>,
    shutdown: watch::Receiver<bool>,
}

impl HeartbeatTimer {
    /// Spawn the timer task. The interval must already be armed in the session.
    pub(crate) fn spawn(
        shared: Arc<Shared>,
        transport: Arc<dyn Transport>,
        interval: Duration,
        signals: mpsc::UnboundedSender<TimerSignal>,
        shutdown: watch::Receiver<bool>,
    ) -> HeartbeatHandle {
        let (stop_tx, stop) = watch::channel(false);
        let timer = Self {
            shared,
            transport,
            interval,
            signals,
            stop,
            shutdown,
        };
        HeartbeatHandle {
            stop: stop_tx,
            task: tokio::spawn(timer.run()),
        }
    }

    async fn run(mut self) {
        let armed_at = Instant::now();
        let mut next = armed_at + self.interval;
        tracing::debug!(interval_ms = self.interval.as_millis() as u64, "Heartbeat timer armed");

        loop {
            tokio::select! {
                _ = sleep_until(next) => {}
                _ = self.stop.wait_for(|stop| *stop) => break,
                _ = self.shutdown.wait_for(|stop| *stop) => break,
            }

            if !self.shared.session.heartbeating_enabled() {
                break;
            }

            let now = Instant::now();
            let sequence = match self.shared.session.begin_heartbeat(now) {
                Ok(sequence) => sequence,
                Err(missed) => {
                    tracing::warn!(
                        waited_ms = now.duration_since(missed.sent_at).as_millis() as u64,
                        "Heartbeat not acknowledged, connection is zombied"
                    );
                    let _ = self.signals.send(TimerSignal::LivenessFailure);
                    break;
                }
            };

            if let Err(e) = self.send(sequence).await {
                tracing::warn!(error = %e, "Failed to send heartbeat");
                let _ = self.signals.send(TimerSignal::SendFailed(e));
                break;
            }

            next += self.interval;
            let now = Instant::now();
            while next <= now {
                next += self.interval;
            }
        }

        tracing::debug!("Heartbeat timer stopped");
    }

    async fn send(&self, sequence: Option<u64>) -> crate::shared::error::Result<()> {
        let frame = GatewaySend::heartbeat(sequence).to_json()?;
        tracing::trace!(sequence = ?sequence, "Sending heartbeat");
        self.transport.send(frame).await
    }
}
