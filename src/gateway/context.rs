//! Callback Context
//!
//! A cheap, clonable handle onto one client instance. Callbacks receive it by
//! reference and may clone it into spawned tasks; it keeps the shared state
//! alive but owns neither the transport nor the background tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::session::{Phase, SessionState};
use crate::domain::{Snowflake, UserInfo};
use crate::infrastructure::RestApi;
use crate::shared::error::{GatewayError, Result};

/// State shared by the controller, the background tasks and every `Context`.
pub(crate) struct Shared {
    pub(crate) session: SessionState,
    pub(crate) rest: Arc<dyn RestApi>,
    current_user: RwLock<Option<UserInfo>>,
    closed: AtomicBool,
}

impl Shared {
    pub(crate) fn new(rest: Arc<dyn RestApi>) -> Self {
        Self {
            session: SessionState::new(),
            rest,
            current_user: RwLock::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_current_user(&self, user: UserInfo) {
        *self.current_user.write() = Some(user);
    }

    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Handle passed to every callback.
#[derive(Clone)]
pub struct Context {
    pub(crate) shared: Arc<Shared>,
}

impl Context {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Current connection phase.
    pub fn phase(&self) -> Phase {
        self.shared.session.phase()
    }

    /// Last dispatch sequence number seen in this session.
    pub fn sequence(&self) -> Option<u64> {
        self.shared.session.sequence()
    }

    /// Last measured heartbeat round-trip time in milliseconds.
    pub fn latency(&self) -> f64 {
        self.shared.session.latency()
    }

    pub fn session_id(&self) -> Option<String> {
        self.shared.session.session_id()
    }

    /// Identity of the connected account, once READY has arrived.
    pub fn current_user(&self) -> Option<UserInfo> {
        self.shared.current_user.read().clone()
    }

    /// Whether the owning client has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Post a message through the REST collaborator.
    pub async fn send_message(&self, channel_id: Snowflake, content: &str) -> Result<()> {
        if self.is_closed() {
            return Err(GatewayError::Closed);
        }
        self.shared.rest.create_message(channel_id, content).await
    }

    /// Look a user up by id through the REST collaborator.
    pub async fn get_user(&self, user_id: Snowflake) -> Result<UserInfo> {
        if self.is_closed() {
            return Err(GatewayError::Closed);
        }
        self.shared.rest.get_user(user_id).await
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("phase", &self.phase())
            .field("sequence", &self.sequence())
            .field("latency", &self.latency())
            .finish()
    }
}
