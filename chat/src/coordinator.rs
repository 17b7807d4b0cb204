//! Session readiness coordinator.
//!
//! DESIGN
//! ======
//! One coordinator owns the session's lifecycle as an explicit state held in
//! a `watch` channel:
//!
//! ```text
//! Uninitialized -> Initializing -> Ready
//!                              \-> Failed -> Initializing (retry)
//! ```
//!
//! `initialize` claims the `Initializing` transition atomically, so
//! concurrent callers never create two sessions; the losers wait on the
//! channel for the winner's outcome. Observers can `subscribe` to every
//! transition.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::client::AgentClient;
use crate::error::ClientError;
use crate::session::OpenedSession;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready(OpenedSession),
    Failed(ClientError),
}

impl SessionState {
    /// True once initialization has an outcome.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Ready(_) | Self::Failed(_))
    }
}

pub struct SessionCoordinator {
    client: Arc<AgentClient>,
    overrides: Option<Map<String, Value>>,
    state: watch::Sender<SessionState>,
}

impl SessionCoordinator {
    #[must_use]
    pub fn new(client: Arc<AgentClient>) -> Self {
        let (state, _) = watch::channel(SessionState::Uninitialized);
        Self { client, overrides: None, state }
    }

    /// Session payload fields to override on creation.
    #[must_use]
    pub fn with_overrides(mut self, overrides: Map<String, Value>) -> Self {
        self.overrides = Some(overrides);
        self
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Create the session unless it exists or is being created.
    ///
    /// Safe to call concurrently; exactly one caller performs the creation
    /// and every caller receives its outcome. A failed state is retried.
    ///
    /// # Errors
    ///
    /// Returns the [`ClientError`] session creation failed with.
    pub async fn initialize(&self) -> Result<OpenedSession, ClientError> {
        let claimed = self.state.send_if_modified(|state| {
            if matches!(state, SessionState::Uninitialized | SessionState::Failed(_)) {
                *state = SessionState::Initializing;
                true
            } else {
                false
            }
        });
        if !claimed {
            return self.wait_ready().await;
        }

        let mut attempt = Attempt { state: &self.state, settled: false };
        let result = self.client.create_session(self.overrides.as_ref()).await;
        attempt.settled = true;
        match result {
            Ok(opened) => {
                info!(session_id = %opened.session.id, "session ready");
                self.state.send_replace(SessionState::Ready(opened.clone()));
                Ok(opened)
            }
            Err(err) => {
                warn!(error = %err, "session initialization failed");
                self.state.send_replace(SessionState::Failed(err.clone()));
                Err(err)
            }
        }
    }

    /// Wait until the session is ready or has failed.
    ///
    /// Does not start initialization; pair with [`SessionCoordinator::initialize`].
    ///
    /// # Errors
    ///
    /// Returns the [`ClientError`] session creation failed with.
    pub async fn wait_ready(&self) -> Result<OpenedSession, ClientError> {
        let mut rx = self.state.subscribe();
        let settled = rx
            .wait_for(SessionState::is_settled)
            .await
            .map_err(|_| ClientError::Cancelled)?;
        match &*settled {
            SessionState::Ready(opened) => Ok(opened.clone()),
            SessionState::Failed(err) => Err(err.clone()),
            SessionState::Uninitialized | SessionState::Initializing => Err(ClientError::Cancelled),
        }
    }
}

/// Held across a creation attempt. If the attempt's future is dropped
/// before it settles, the state moves to `Failed(Cancelled)` so waiters wake
/// and the next `initialize` retries.
struct Attempt<'a> {
    state: &'a watch::Sender<SessionState>,
    settled: bool,
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!("session initialization abandoned");
            self.state.send_replace(SessionState::Failed(ClientError::Cancelled));
        }
    }
}

#[cfg(test)]
#[path = "coordinator_test.rs"]
mod tests;
