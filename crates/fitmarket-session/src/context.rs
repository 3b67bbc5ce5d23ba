//! Application-scoped session context.
//!
//! A [`SessionContext`] is created once at startup and passed to every
//! consumer that needs the active role. Consumers hold a [`watch::Receiver`]
//! and re-render when the state changes; a role switch is a broadcast, not a
//! restart.

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use fitmarket_live::LiveSubscriptions;

use crate::error::Error;
use crate::role::Role;

/// Snapshot of a session, broadcast on every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub session_id: String,
    pub role: Role,
    /// Incremented on every role switch or invalidation.
    pub generation: u64,
    pub ended: bool,
}

/// The session context.
#[derive(Debug)]
pub struct SessionContext {
    tx: watch::Sender<SessionState>,
    live: Option<LiveSubscriptions>,
}

impl SessionContext {
    /// Start a new session with the given role.
    pub fn start(role: Role) -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        info!(session_id = %session_id, role = %role, "session started");

        let (tx, _rx) = watch::channel(SessionState {
            session_id,
            role,
            generation: 0,
            ended: false,
        });

        Self { tx, live: None }
    }

    /// Attach a session-owned subscription manager on the same feed as `live`.
    ///
    /// Subscriptions opened through [`SessionContext::live`] belong to the
    /// session and close when it ends. Subscriptions opened on `live` itself,
    /// or on any other clone of it, are left alone.
    pub fn with_live(mut self, live: &LiveSubscriptions) -> Self {
        self.live = Some(live.fork());
        self
    }

    pub fn session_id(&self) -> String {
        self.tx.borrow().session_id.clone()
    }

    /// The active role.
    pub fn role(&self) -> Role {
        self.tx.borrow().role
    }

    /// A snapshot of the current state.
    pub fn state(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    /// Check if the session has ended.
    pub fn is_ended(&self) -> bool {
        self.tx.borrow().ended
    }

    /// Subscribe to state changes.
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// The session-owned subscription manager, if one is attached.
    pub fn live(&self) -> Option<&LiveSubscriptions> {
        self.live.as_ref()
    }

    /// Switch the active role and notify watchers.
    ///
    /// Switching to the role already active changes nothing.
    pub fn switch_role(&self, role: Role) -> Result<SessionState, Error> {
        self.update(|state| {
            if state.role == role {
                return false;
            }
            debug!(from = %state.role, to = %role, "switching role");
            state.role = role;
            true
        })
    }

    /// Force watchers to re-read the session without changing it.
    pub fn invalidate(&self) -> Result<SessionState, Error> {
        self.update(|_| true)
    }

    /// End the session and close every subscription it owns.
    ///
    /// Returns the number of subscriptions closed. Ending twice is a no-op.
    pub fn end(&self) -> usize {
        let ended = self.tx.send_if_modified(|state| {
            if state.ended {
                return false;
            }
            state.ended = true;
            state.generation += 1;
            true
        });
        if !ended {
            return 0;
        }

        let closed = self.live.as_ref().map_or(0, |live| live.close_all());
        info!(session_id = %self.session_id(), closed, "session ended");
        closed
    }

    fn update(&self, change: impl FnOnce(&mut SessionState) -> bool) -> Result<SessionState, Error> {
        let mut result = Ok(());
        self.tx.send_if_modified(|state| {
            if state.ended {
                result = Err(Error::SessionEnded(state.session_id.clone()));
                return false;
            }
            if change(state) {
                state.generation += 1;
                true
            } else {
                false
            }
        });

        result.map(|()| self.state())
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        self.end();
    }
}
