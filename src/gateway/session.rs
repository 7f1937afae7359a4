//! Gateway Session State
//!
//! The one mutable record shared by the reader and heartbeat tasks. Every
//! field sits behind a single `parking_lot::Mutex`; the lock is never held
//! across an await point, so no writer can stall on I/O while holding it.
//! `heartbeating` is a separate atomic so the controller can flip it without
//! contending with either task.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::shared::error::{GatewayError, Result};

/// Connection phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Disconnected,
    Connecting,
    AwaitingHello,
    Identified,
    Connected,
    Reconnecting,
    Closing,
}

impl Phase {
    /// Whether moving from `self` to `next` is allowed. Within one attempt the
    /// phase only moves forward; failures leave through `Reconnecting` or
    /// `Closing`.
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;
        match (self, next) {
            (Closing, Disconnected) => true,
            (Closing, _) => false,
            (_, Closing) => true,
            (Disconnected, Connecting) => true,
            (Connecting, AwaitingHello) => true,
            (AwaitingHello, Identified) => true,
            (Identified, Connected) => true,
            (Disconnected, Reconnecting) => false,
            (_, Reconnecting) => true,
            (Reconnecting, Connecting) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Disconnected => "disconnected",
            Phase::Connecting => "connecting",
            Phase::AwaitingHello => "awaiting_hello",
            Phase::Identified => "identified",
            Phase::Connected => "connected",
            Phase::Reconnecting => "reconnecting",
            Phase::Closing => "closing",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A latency change worth reporting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyChange {
    pub old: f64,
    pub new: f64,
}

/// The previous heartbeat was never acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissedAck {
    pub sent_at: Instant,
}

#[derive(Debug)]
struct Inner {
    phase: Phase,
    sequence: Option<u64>,
    session_id: Option<String>,
    resume_url: Option<String>,
    heartbeat_interval: Option<u64>,
    heartbeat_sent_at: Option<Instant>,
    latency_ms: f64,
}

/// Shared mutable connection record.
#[derive(Debug)]
pub struct SessionState {
    inner: Mutex<Inner>,
    heartbeating: AtomicBool,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                phase: Phase::Disconnected,
                sequence: None,
                session_id: None,
                resume_url: None,
                heartbeat_interval: None,
                heartbeat_sent_at: None,
                latency_ms: 0.0,
            }),
            heartbeating: AtomicBool::new(false),
        }
    }

    // --- Phase ---

    pub fn phase(&self) -> Phase {
        self.inner.lock().phase
    }

    /// Move to `next`, rejecting transitions that would go backward.
    pub fn transition(&self, next: Phase) -> bool {
        let mut inner = self.inner.lock();
        let current = inner.phase;
        if current == next {
            return true;
        }
        if !current.can_transition_to(next) {
            tracing::warn!(from = %current, to = %next, "Rejected phase transition");
            return false;
        }
        inner.phase = next;
        drop(inner);

        tracing::debug!(from = %current, to = %next, "Phase transition");
        true
    }

    // --- Sequence / session ---

    pub fn sequence(&self) -> Option<u64> {
        self.inner.lock().sequence
    }

    /// Record the sequence number carried by a dispatch. Values older than the
    /// current one are ignored so the sequence never decreases within a session.
    pub fn record_sequence(&self, sequence: u64) {
        let mut inner = self.inner.lock();
        match inner.sequence {
            Some(current) if sequence < current => {
                tracing::warn!(current, received = sequence, "Ignoring out-of-order sequence");
            }
            _ => inner.sequence = Some(sequence),
        }
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.lock().session_id.clone()
    }

    pub fn set_session_id(&self, session_id: String) {
        self.inner.lock().session_id = Some(session_id);
    }

    /// Endpoint the server asked resumes to go to.
    pub fn resume_url(&self) -> Option<String> {
        self.inner.lock().resume_url.clone()
    }

    pub fn set_resume_url(&self, url: Option<String>) {
        self.inner.lock().resume_url = url;
    }

    /// Session id and sequence, when both are known and the session can be resumed.
    pub fn resume_point(&self) -> Option<(String, u64)> {
        let inner = self.inner.lock();
        Some((inner.session_id.clone()?, inner.sequence?))
    }

    /// Forget the logical session so the next attempt identifies from scratch.
    pub fn invalidate(&self) {
        let mut inner = self.inner.lock();
        inner.sequence = None;
        inner.session_id = None;
        inner.resume_url = None;
    }

    // --- Heartbeat ---

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.inner.lock().heartbeat_interval.map(Duration::from_millis)
    }

    /// Set the heartbeat interval. Only one hello is allowed per connection.
    pub fn arm_heartbeat(&self, interval_ms: u64) -> Result<()> {
        if interval_ms == 0 {
            return Err(GatewayError::Protocol("hello carried a zero heartbeat interval".into()));
        }
        let mut inner = self.inner.lock();
        if inner.heartbeat_interval.is_some() {
            return Err(GatewayError::Protocol("duplicate hello on one connection".into()));
        }
        inner.heartbeat_interval = Some(interval_ms);
        inner.heartbeat_sent_at = None;
        drop(inner);

        self.heartbeating.store(true, Ordering::Release);
        Ok(())
    }

    /// Clear heartbeat arming between connection attempts.
    pub fn disarm_heartbeat(&self) {
        self.heartbeating.store(false, Ordering::Release);
        let mut inner = self.inner.lock();
        inner.heartbeat_interval = None;
        inner.heartbeat_sent_at = None;
    }

    /// Start a scheduled heartbeat: stamps the send time and returns the
    /// sequence to carry. Fails if the previous heartbeat is still unacknowledged.
    pub fn begin_heartbeat(&self, now: Instant) -> std::result::Result<Option<u64>, MissedAck> {
        let mut inner = self.inner.lock();
        if let Some(sent_at) = inner.heartbeat_sent_at {
            return Err(MissedAck { sent_at });
        }
        inner.heartbeat_sent_at = Some(now);
        Ok(inner.sequence)
    }

    /// Start a heartbeat the server asked for, regardless of one in flight.
    pub fn force_heartbeat(&self, now: Instant) -> Option<u64> {
        let mut inner = self.inner.lock();
        inner.heartbeat_sent_at.get_or_insert(now);
        inner.sequence
    }

    /// Record an acknowledgement. Returns the latency change when the new
    /// round-trip time differs from the previous one.
    pub fn record_ack(&self, now: Instant) -> Option<LatencyChange> {
        let mut inner = self.inner.lock();
        let sent_at = inner.heartbeat_sent_at.take()?;
        let new = now.saturating_duration_since(sent_at).as_nanos() as f64 / 1_000_000.0;
        let old = std::mem::replace(&mut inner.latency_ms, new);
        (old != new).then_some(LatencyChange { old, new })
    }

    /// Whether a heartbeat has been sent and not yet acknowledged.
    pub fn heartbeat_in_flight(&self) -> bool {
        self.inner.lock().heartbeat_sent_at.is_some()
    }

    /// Last measured round-trip time in milliseconds.
    pub fn latency(&self) -> f64 {
        self.inner.lock().latency_ms
    }

    pub fn heartbeating_enabled(&self) -> bool {
        self.heartbeating.load(Ordering::Acquire)
    }

    pub fn set_heartbeating(&self, enabled: bool) {
        self.heartbeating.store(enabled, Ordering::Release);
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
