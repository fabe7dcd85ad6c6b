//! Pending user turn model.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A queued user message awaiting dispatch to the agent subprocess.
///
/// Turns queue in arrival order across all clients; exactly one is in
/// flight at a time. The originating client id is diagnostic only, the
/// resulting conversation fans out to every connected client.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PendingTurn {
    /// User message text.
    pub text: String,
    /// Client that submitted the turn.
    pub client_id: Uuid,
    /// Arrival timestamp.
    pub submitted_at: DateTime<Utc>,
}

impl PendingTurn {
    /// Construct a turn stamped with the current time.
    #[must_use]
    pub fn new(text: String, client_id: Uuid) -> Self {
        Self {
            text,
            client_id,
            submitted_at: Utc::now(),
        }
    }
}
