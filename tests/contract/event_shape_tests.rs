//! Contract tests for bridge-originated `system` events.
//!
//! These frames are produced by the bridge itself, not the agent, yet
//! they travel the same client channel and must keep the same tagged
//! shape so clients need only one decoder.

use serde_json::{json, Value};

use agent_bridge::models::session::Session;
use agent_bridge::wire::message::AgentMessage;

fn serialize(message: &AgentMessage) -> Value {
    serde_json::to_value(message).expect("serialize")
}

#[test]
fn respawning_event_carries_attempt_accounting() {
    let message = AgentMessage::bridge_event(
        "respawning",
        json!({ "attempt": 2, "max_attempts": 3, "delay_ms": 3000 }),
    );

    assert_eq!(
        serialize(&message),
        json!({
            "type": "system",
            "subtype": "respawning",
            "data": { "attempt": 2, "max_attempts": 3, "delay_ms": 3000 },
        })
    );
}

#[test]
fn gave_up_event_reports_exhausted_attempts() {
    let message = AgentMessage::bridge_event("gave_up", json!({ "attempts": 3 }));

    assert_eq!(
        serialize(&message),
        json!({
            "type": "system",
            "subtype": "gave_up",
            "data": { "attempts": 3 },
        })
    );
}

#[test]
fn shutdown_event_has_empty_data() {
    let message = AgentMessage::bridge_event("shutdown", json!({}));

    assert_eq!(
        serialize(&message),
        json!({
            "type": "system",
            "subtype": "shutdown",
            "data": {},
        })
    );
}

#[test]
fn agent_unavailable_event_names_the_reason() {
    let message =
        AgentMessage::bridge_event("agent_unavailable", json!({ "reason": "agent is not running" }));

    assert_eq!(
        serialize(&message),
        json!({
            "type": "system",
            "subtype": "agent_unavailable",
            "data": { "reason": "agent is not running" },
        })
    );
}

#[test]
fn invalid_message_event_names_the_reason() {
    let message = AgentMessage::bridge_event(
        "invalid_message",
        json!({ "reason": "invalid client frame: missing field `content`" }),
    );

    let value = serialize(&message);
    assert_eq!(value["type"], "system");
    assert_eq!(value["subtype"], "invalid_message");
    assert!(value["data"]["reason"]
        .as_str()
        .expect("reason string")
        .starts_with("invalid client frame"));
}

#[test]
fn init_replay_matches_the_original_init_shape() {
    let session = Session::new(
        "sess-7".to_owned(),
        "opus".to_owned(),
        vec!["bash".to_owned(), "edit".to_owned()],
    );

    let message = AgentMessage::init_replay(&session);

    assert_eq!(
        serialize(&message),
        json!({
            "type": "system",
            "subtype": "init",
            "session_id": "sess-7",
            "model": "opus",
            "tools": ["bash", "edit"],
        })
    );
}

#[test]
fn bridge_events_never_carry_session_identity_keys() {
    let message = AgentMessage::bridge_event("respawning", json!({ "attempt": 1 }));

    let value = serialize(&message);
    let object = value.as_object().expect("object");
    assert!(!object.contains_key("session_id"));
    assert!(!object.contains_key("model"));
    assert!(!object.contains_key("tools"));
}
