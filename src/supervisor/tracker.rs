//! Session state tracking.
//!
//! [`SessionTracker`] is the single owner of the mutable session state.
//! Only the supervisor's sequential pump mutates it; every other
//! component reads whole published copies through a [`watch`] channel,
//! so a reader never observes a half-updated session.

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::models::session::{Session, SessionStatus, SessionView};
use crate::wire::message::{
    AgentMessage, AssistantPayload, ContentBlock, ResultPayload, SystemPayload,
};

/// Owner of the active [`Session`], driven by parsed agent messages.
#[derive(Debug)]
pub struct SessionTracker {
    view: SessionView,
    view_tx: watch::Sender<SessionView>,
}

impl SessionTracker {
    /// Create a tracker publishing through `view_tx`.
    #[must_use]
    pub fn new(view_tx: watch::Sender<SessionView>) -> Self {
        Self {
            view: SessionView::default(),
            view_tx,
        }
    }

    /// Current session, if any.
    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.view.session.as_ref()
    }

    /// Install the placeholder session for a freshly launched subprocess.
    ///
    /// Any previous session is discarded; its accumulated state is gone
    /// once the replacement spawn begins.
    pub fn begin_spawning(&mut self) {
        self.view.session = Some(Session::spawning());
        self.publish();
    }

    /// Apply one parsed agent message to the session state.
    ///
    /// Stamps `last_message_at` for every message, then applies the
    /// transition rules for its type. Messages that arrive in a state
    /// where they make no sense are discarded with a diagnostic.
    pub fn apply(&mut self, message: &AgentMessage) {
        self.view.last_message_at = Some(Utc::now());
        match message {
            AgentMessage::System(payload) => self.apply_system(payload),
            AgentMessage::Assistant(payload) => self.apply_assistant(payload),
            AgentMessage::Result(payload) => self.apply_result(payload),
            AgentMessage::StreamEvent(_) => {
                // Legacy delta, passed through to clients without state effect.
            }
        }
        self.publish();
    }

    /// Mark the active session errored after the subprocess died.
    ///
    /// This is the supervisor's crash path, not a stream-driven
    /// transition; a session already terminal is left untouched so the
    /// frozen result fields stand.
    pub fn mark_errored(&mut self) {
        if let Some(session) = self.view.session.as_mut() {
            if !session.status.is_terminal() {
                session.status = SessionStatus::Errored;
                self.publish();
            }
        }
    }

    fn apply_system(&mut self, payload: &SystemPayload) {
        if payload.subtype != "init" {
            debug!(
                subtype = payload.subtype.as_str(),
                "system message without state effect"
            );
            return;
        }

        let (Some(id), Some(model)) = (payload.session_id.clone(), payload.model.clone()) else {
            warn!("init message missing session identity, ignoring");
            return;
        };

        if let Some(current) = self.session() {
            if current.status != SessionStatus::Spawning && !current.status.is_terminal() {
                warn!(
                    old_session = current.id.as_str(),
                    new_session = id.as_str(),
                    "live session replaced by new init"
                );
            }
        }

        let tools = payload.tools.clone().unwrap_or_default();
        debug!(
            session_id = id.as_str(),
            model = model.as_str(),
            tool_count = tools.len(),
            "session initialized"
        );
        self.view.session = Some(Session::new(id, model, tools));
    }

    fn apply_assistant(&mut self, payload: &AssistantPayload) {
        let Some(session) = self.view.session.as_mut() else {
            warn!("assistant message with no live session, discarding");
            return;
        };

        if session.status == SessionStatus::Spawning {
            warn!("assistant message before init, discarding");
            return;
        }

        // A terminal status means this content opens the next turn.
        if session.status.is_terminal() {
            session.reset_turn();
        }
        if session.status != SessionStatus::Streaming {
            session.status = SessionStatus::Streaming;
        }

        for block in &payload.message.content {
            match block {
                ContentBlock::Text { text } => session.turn_text.push_str(text),
                ContentBlock::ToolUse { name, .. } => session.turn_tools.push(name.clone()),
            }
        }
    }

    fn apply_result(&mut self, payload: &ResultPayload) {
        let Some(session) = self.view.session.as_mut() else {
            warn!("result message with no live session, discarding");
            return;
        };

        let next = if payload.is_failure() {
            SessionStatus::Errored
        } else {
            SessionStatus::Done
        };

        if !session.status.can_transition_to(next) {
            warn!(
                current = ?session.status,
                subtype = payload.subtype.as_str(),
                "result not applicable in current status, ignoring"
            );
            return;
        }

        session.status = next;
        session.duration_ms = payload.duration_ms;
        session.total_cost_usd = payload.total_cost_usd;
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.view.clone());
    }
}
