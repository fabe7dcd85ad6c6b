//! Wire message model for the agent stream protocol.
//!
//! One JSON document per line (subprocess side) or per WebSocket text
//! frame (client side). Parsing is tolerant at the tag level: a line
//! whose `type` is unknown is skipped, only structural failures are
//! surfaced as framing errors.
//!
//! # Known message types
//!
//! | Tag            | Direction        | Meaning                              |
//! |----------------|------------------|--------------------------------------|
//! | `system`       | agent → clients  | `init` announcement or bridge event  |
//! | `assistant`    | agent → clients  | completed assistant turn content     |
//! | `result`       | agent → clients  | terminal turn result                 |
//! | `stream_event` | agent → clients  | legacy incremental delta, verbatim   |
//! | `user_message` | client → agent   | one user turn                        |
//! | *(any other)*  | —                | skipped; logged at `DEBUG`           |

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::models::session::Session;
use crate::{AppError, Result};

// ── Agent → client messages ───────────────────────────────────────────────────

/// Top-level message on the agent stream, fanned out to clients verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    /// `init` announcement or bridge-originated event.
    System(SystemPayload),
    /// Completed assistant turn content.
    Assistant(AssistantPayload),
    /// Terminal turn result.
    Result(ResultPayload),
    /// Legacy incremental delta, passed through without interpretation.
    StreamEvent(StreamEventPayload),
}

/// Body of a `system` message.
///
/// `subtype` is `"init"` for the agent's session announcement; any other
/// subtype is a bridge event (`respawning`, `gave_up`, …) carrying its
/// payload in `data`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemPayload {
    /// `"init"` or a bridge-event name.
    pub subtype: String,
    /// Session identifier (init only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Model name (init only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Available tool names (init only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    /// Event payload (bridge events only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Body of an `assistant` message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssistantPayload {
    /// The model response.
    pub message: AssistantBody,
}

/// Model response carried by an `assistant` message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssistantBody {
    /// Model that produced the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Ordered content blocks.
    pub content: Vec<ContentBlock>,
}

/// Content block within an assistant turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Text fragment.
    Text {
        /// Fragment content.
        text: String,
    },
    /// Tool invocation record.
    ToolUse {
        /// Invocation identifier assigned by the agent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Tool name.
        name: String,
        /// Tool input payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<Value>,
    },
}

/// Body of a terminal `result` message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultPayload {
    /// Outcome class: `"success"` or an error subtype.
    pub subtype: String,
    /// Explicit failure flag.
    #[serde(default)]
    pub is_error: bool,
    /// Human-readable result text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Turn duration in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Turn cost in USD.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
    /// Error detail when failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultPayload {
    /// Whether this result represents a failed turn.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.is_error || self.subtype.starts_with("error")
    }
}

/// Body of a `stream_event` message; the event is not interpreted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamEventPayload {
    /// Raw delta event.
    pub event: Value,
}

impl AgentMessage {
    /// Build a bridge-originated `system` event.
    #[must_use]
    pub fn bridge_event(name: &str, data: Value) -> Self {
        Self::System(SystemPayload {
            subtype: name.to_owned(),
            session_id: None,
            model: None,
            tools: None,
            data: Some(data),
        })
    }

    /// Build the `init` replay frame for a late-joining client.
    #[must_use]
    pub fn init_replay(session: &Session) -> Self {
        Self::System(SystemPayload {
            subtype: "init".to_owned(),
            session_id: Some(session.id.clone()),
            model: Some(session.model.clone()),
            tools: Some(session.tools.clone()),
            data: None,
        })
    }

    /// Build a synthesized error `result` for a turn the agent never finished.
    #[must_use]
    pub fn error_result(reason: &str) -> Self {
        Self::Result(ResultPayload {
            subtype: "error".to_owned(),
            is_error: true,
            result: None,
            duration_ms: None,
            total_cost_usd: None,
            error: Some(reason.to_owned()),
        })
    }
}

// ── Client → agent messages ───────────────────────────────────────────────────

/// Frame received from a connected client.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// One user turn.
    UserMessage {
        /// Ordered content blocks; only text is accepted from clients.
        content: Vec<UserContent>,
    },
}

/// Content block within a client `user_message`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserContent {
    /// Text fragment.
    Text {
        /// Fragment content.
        text: String,
    },
}

impl ClientFrame {
    /// Concatenated text of the frame's content blocks.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::UserMessage { content } => {
                let parts: Vec<&str> = content
                    .iter()
                    .map(|UserContent::Text { text }| text.as_str())
                    .collect();
                parts.join("\n")
            }
        }
    }
}

// ── Parsing and encoding ──────────────────────────────────────────────────────

/// Parse a single line from the agent stream into an [`AgentMessage`].
///
/// # Return value
///
/// - `Ok(Some(message))` — the line is a recognized, complete message.
/// - `Ok(None)` — the line is empty/whitespace or has an unknown `type`
///   tag (silently skipped; unknown tags are logged at `DEBUG` level).
/// - `Err(AppError::Frame(...))` — the line is not valid JSON, lacks a
///   `type` tag, or a known tag has a malformed body.
///
/// # Errors
///
/// - [`AppError::Frame`]`("malformed json: …")` — not valid JSON.
/// - [`AppError::Frame`]`("missing `type` tag")` — JSON without a tag.
/// - [`AppError::Frame`]`("invalid … message: …")` — recognized tag with
///   a body that fails to decode.
pub fn parse_line(line: &str) -> Result<Option<AgentMessage>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(line)
        .map_err(|e| AppError::Frame(format!("malformed json: {e}")))?;

    let Some(tag) = value.get("type").and_then(Value::as_str).map(str::to_owned) else {
        return Err(AppError::Frame("missing `type` tag".into()));
    };

    match tag.as_str() {
        "system" | "assistant" | "result" | "stream_event" => {
            let message: AgentMessage = serde_json::from_value(value)
                .map_err(|e| AppError::Frame(format!("invalid {tag} message: {e}")))?;
            Ok(Some(message))
        }
        other => {
            debug!(tag = other, "skipping unknown message type");
            Ok(None)
        }
    }
}

/// Parse a frame received from a connected client.
///
/// # Errors
///
/// Returns [`AppError::Frame`] when the frame is not valid JSON or not a
/// recognized client message.
pub fn parse_client_frame(raw: &str) -> Result<ClientFrame> {
    serde_json::from_str(raw).map_err(|e| AppError::Frame(format!("invalid client frame: {e}")))
}

/// Build the envelope the subprocess expects for one user turn.
#[must_use]
pub fn encode_user_message(text: &str) -> Value {
    serde_json::json!({
        "type": "user_message",
        "content": [{ "type": "text", "text": text }],
    })
}
