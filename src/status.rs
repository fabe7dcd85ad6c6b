//! Read-only status snapshot for external health checks.
//!
//! [`StatusReporter`] assembles its snapshot entirely from published
//! `watch` copies and an atomic counter, so querying status never
//! contends with the supervisor's stream pump.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::hub::ClientHub;
use crate::models::session::{SessionStatus, SessionView};
use crate::supervisor::SupervisorState;

/// Point-in-time summary of supervisor and session state.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct StatusSnapshot {
    /// Supervisor lifecycle state.
    pub agent: SupervisorState,
    /// Active session id, once assigned by `init`.
    pub session_id: Option<String>,
    /// Model announced at `init`.
    pub model: Option<String>,
    /// Session lifecycle status.
    pub session_status: Option<SessionStatus>,
    /// Timestamp of the last message parsed from the subprocess.
    pub last_message_at: Option<DateTime<Utc>>,
    /// Currently connected client count.
    pub connected_clients: usize,
}

/// Snapshot assembler over the published state copies.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    supervisor_rx: watch::Receiver<SupervisorState>,
    view_rx: watch::Receiver<SessionView>,
    hub: Arc<ClientHub>,
}

impl StatusReporter {
    /// Create a reporter over the supervisor and session channels.
    #[must_use]
    pub fn new(
        supervisor_rx: watch::Receiver<SupervisorState>,
        view_rx: watch::Receiver<SessionView>,
        hub: Arc<ClientHub>,
    ) -> Self {
        Self {
            supervisor_rx,
            view_rx,
            hub,
        }
    }

    /// Assemble a consistent snapshot.
    ///
    /// Identity fields stay `None` while the placeholder session of a
    /// starting subprocess has not been named by `init` yet.
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        let agent = *self.supervisor_rx.borrow();
        let view = self.view_rx.borrow().clone();
        let session = view.session.as_ref();

        StatusSnapshot {
            agent,
            session_id: session
                .map(|s| s.id.clone())
                .filter(|id| !id.is_empty()),
            model: session
                .map(|s| s.model.clone())
                .filter(|model| !model.is_empty()),
            session_status: session.map(|s| s.status),
            last_message_at: view.last_message_at,
            connected_clients: self.hub.connected_clients(),
        }
    }
}
