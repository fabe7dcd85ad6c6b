//! Contract tests for the client-to-bridge frame format and the
//! envelope forwarded to the agent subprocess.

use serde_json::json;

use agent_bridge::wire::message::{encode_user_message, parse_client_frame};

#[test]
fn user_message_is_the_accepted_client_frame() {
    let frame = parse_client_frame(
        r#"{"type":"user_message","content":[{"type":"text","text":"run the tests"}]}"#,
    )
    .expect("parse");

    assert_eq!(frame.text(), "run the tests");
}

#[test]
fn agent_envelope_uses_the_user_message_shape() {
    assert_eq!(
        encode_user_message("run the tests"),
        json!({
            "type": "user_message",
            "content": [{ "type": "text", "text": "run the tests" }],
        })
    );
}

#[test]
fn agent_envelope_is_single_line_json() {
    let envelope = encode_user_message("line one\nline two");
    let serialized = serde_json::to_string(&envelope).expect("serialize");

    assert!(
        !serialized.contains('\n'),
        "embedded newlines must stay escaped for NDJSON transport: {serialized}"
    );
}

#[test]
fn client_frame_text_round_trips_into_the_envelope() {
    let frame = parse_client_frame(
        r#"{"type":"user_message","content":[{"type":"text","text":"first"},{"type":"text","text":"second"}]}"#,
    )
    .expect("parse");

    assert_eq!(
        encode_user_message(&frame.text()),
        json!({
            "type": "user_message",
            "content": [{ "type": "text", "text": "first\nsecond" }],
        })
    );
}
