//! Session model and lifecycle helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status for the active agent session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Subprocess launched, `init` not yet received.
    Spawning,
    /// `init` received; no turn in flight.
    Ready,
    /// Assistant content arriving for the in-flight turn.
    Streaming,
    /// Terminal result received with a success subtype.
    Done,
    /// Terminal result received with an error subtype, or the subprocess died.
    Errored,
}

impl SessionStatus {
    /// Determine whether a lifecycle transition is permitted.
    ///
    /// Terminal statuses admit a follow-up turn on the same live process:
    /// the next turn's first content block moves the session back into
    /// `Streaming`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Spawning, Self::Ready | Self::Errored)
                | (Self::Ready, Self::Streaming | Self::Done | Self::Errored)
                | (Self::Streaming, Self::Done | Self::Errored)
                | (Self::Done | Self::Errored, Self::Streaming | Self::Ready)
        )
    }

    /// Whether the status is terminal for the current turn.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Errored)
    }
}

/// The active conversation session, one per subprocess lifetime.
///
/// The id is assigned by the agent's `init` message and never reused;
/// a respawn always produces a fresh `Session`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Identifier assigned by the agent at `init`; immutable afterwards.
    pub id: String,
    /// Model name announced at `init`.
    pub model: String,
    /// Tool names announced at `init`, retained for late-join replay.
    pub tools: Vec<String>,
    /// Timestamp of the `init` message.
    pub started_at: DateTime<Utc>,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Accumulated assistant text for the in-flight turn.
    pub turn_text: String,
    /// Tool names invoked during the in-flight turn.
    pub turn_tools: Vec<String>,
    /// Turn duration in milliseconds; set once at the terminal result.
    pub duration_ms: Option<u64>,
    /// Turn cost in USD; set once at the terminal result.
    pub total_cost_usd: Option<f64>,
}

impl Session {
    /// Construct a fresh session from the agent's `init` announcement.
    #[must_use]
    pub fn new(id: String, model: String, tools: Vec<String>) -> Self {
        Self {
            id,
            model,
            tools,
            started_at: Utc::now(),
            status: SessionStatus::Ready,
            turn_text: String::new(),
            turn_tools: Vec::new(),
            duration_ms: None,
            total_cost_usd: None,
        }
    }

    /// Construct the placeholder session for a subprocess that has been
    /// launched but has not yet announced itself.
    ///
    /// Identity fields stay empty until `init` assigns them.
    #[must_use]
    pub fn spawning() -> Self {
        Self {
            id: String::new(),
            model: String::new(),
            tools: Vec::new(),
            started_at: Utc::now(),
            status: SessionStatus::Spawning,
            turn_text: String::new(),
            turn_tools: Vec::new(),
            duration_ms: None,
            total_cost_usd: None,
        }
    }

    /// Clear per-turn accumulation ahead of a new turn.
    pub fn reset_turn(&mut self) {
        self.turn_text.clear();
        self.turn_tools.clear();
        self.duration_ms = None;
        self.total_cost_usd = None;
    }
}

/// Published copy of the session state, refreshed after every mutation.
///
/// Readers (status endpoint, client hub) only ever see whole copies,
/// never the tracker's live mutable state.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct SessionView {
    /// The active session, if any.
    pub session: Option<Session>,
    /// Timestamp of the most recent message parsed from the subprocess.
    pub last_message_at: Option<DateTime<Utc>>,
}
