//! End-to-end conversation flow over a scripted fake agent.
//!
//! Each test spawns the real supervisor against a `/bin/sh` script that
//! speaks the NDJSON stream protocol, then drives turns through the hub
//! exactly as the WebSocket layer would.

use agent_bridge::models::session::SessionStatus;
use agent_bridge::supervisor::SupervisorState;

use super::test_helpers::{frame_where, next_frame, script_config, start_bridge};

/// Fake agent: announces itself, answers one turn, then idles.
const SINGLE_TURN: &str = r#"
echo '{"type":"system","subtype":"init","session_id":"fake-1","model":"fake-model","tools":["bash"]}'
read line
echo '{"type":"stream_event","event":{"delta":"4"}}'
echo '{"type":"assistant","message":{"model":"fake-model","content":[{"type":"text","text":"4"}]}}'
echo '{"type":"result","subtype":"success","is_error":false,"result":"4","duration_ms":1200,"total_cost_usd":0.002}'
sleep 5
"#;

#[tokio::test]
async fn full_turn_flows_from_submit_to_result() {
    let config = script_config(SINGLE_TURN);
    let mut bridge = start_bridge(&config);
    let mut client = bridge.hub.register().await;

    bridge.wait_for_state(SupervisorState::Running).await;
    bridge
        .hub
        .submit(client.id, "what is 2+2".to_owned())
        .await
        .expect("submit");

    let init = frame_where(&mut client.rx, |f| f["subtype"] == "init").await;
    assert_eq!(init["session_id"], "fake-1");
    assert_eq!(init["model"], "fake-model");

    let delta = frame_where(&mut client.rx, |f| f["type"] == "stream_event").await;
    assert_eq!(delta["event"]["delta"], "4");

    let assistant = frame_where(&mut client.rx, |f| f["type"] == "assistant").await;
    assert_eq!(assistant["message"]["content"][0]["text"], "4");

    let result = frame_where(&mut client.rx, |f| f["type"] == "result").await;
    assert_eq!(result["subtype"], "success");
    assert_eq!(result["duration_ms"], 1200);

    // The published session reflects the finished turn.
    let view = bridge.view_rx.borrow().clone();
    let session = view.session.expect("session");
    assert_eq!(session.status, SessionStatus::Done);
    assert_eq!(session.turn_text, "4");
    assert_eq!(session.duration_ms, Some(1200));

    bridge.shutdown().await;
}

#[tokio::test]
async fn malformed_stream_line_does_not_break_the_turn() {
    let script = r#"
echo '{"type":"system","subtype":"init","session_id":"fake-2","model":"fake-model","tools":[]}'
read line
echo 'this is not json'
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"survived"}]}}'
echo '{"type":"result","subtype":"success","duration_ms":10}'
sleep 5
"#;
    let config = script_config(script);
    let mut bridge = start_bridge(&config);
    let mut client = bridge.hub.register().await;

    bridge.wait_for_state(SupervisorState::Running).await;
    bridge
        .hub
        .submit(client.id, "go".to_owned())
        .await
        .expect("submit");

    let assistant = frame_where(&mut client.rx, |f| f["type"] == "assistant").await;
    assert_eq!(assistant["message"]["content"][0]["text"], "survived");
    let result = frame_where(&mut client.rx, |f| f["type"] == "result").await;
    assert_eq!(result["subtype"], "success");

    bridge.shutdown().await;
}

#[tokio::test]
async fn late_joining_client_receives_init_replay() {
    let script = r#"
echo '{"type":"system","subtype":"init","session_id":"fake-3","model":"fake-model","tools":["bash","edit"]}'
sleep 5
"#;
    let config = script_config(script);
    let mut bridge = start_bridge(&config);

    bridge.wait_for_state(SupervisorState::Running).await;
    // Let the init broadcast finish so the replay is the only init the
    // late joiner can see.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let mut client = bridge.hub.register().await;

    let first = next_frame(&mut client.rx).await;
    assert_eq!(first["type"], "system");
    assert_eq!(first["subtype"], "init");
    assert_eq!(first["session_id"], "fake-3");
    assert_eq!(first["tools"], serde_json::json!(["bash", "edit"]));

    bridge.shutdown().await;
}

#[tokio::test]
async fn turns_from_two_clients_serialize_in_submission_order() {
    let script = r#"
echo '{"type":"system","subtype":"init","session_id":"fake-4","model":"fake-model","tools":[]}'
read line
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"answer one"}]}}'
echo '{"type":"result","subtype":"success","duration_ms":5}'
read line
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"answer two"}]}}'
echo '{"type":"result","subtype":"success","duration_ms":6}'
sleep 5
"#;
    let config = script_config(script);
    let mut bridge = start_bridge(&config);
    let mut first = bridge.hub.register().await;
    let second = bridge.hub.register().await;

    bridge.wait_for_state(SupervisorState::Running).await;
    bridge
        .hub
        .submit(first.id, "turn one".to_owned())
        .await
        .expect("submit turn one");
    bridge
        .hub
        .submit(second.id, "turn two".to_owned())
        .await
        .expect("submit turn two");

    // Both turns fan out to every client, serialized in arrival order.
    let a1 = frame_where(&mut first.rx, |f| f["type"] == "assistant").await;
    assert_eq!(a1["message"]["content"][0]["text"], "answer one");
    let r1 = frame_where(&mut first.rx, |f| f["type"] == "result").await;
    assert_eq!(r1["duration_ms"], 5);

    let a2 = frame_where(&mut first.rx, |f| f["type"] == "assistant").await;
    assert_eq!(a2["message"]["content"][0]["text"], "answer two");
    let r2 = frame_where(&mut first.rx, |f| f["type"] == "result").await;
    assert_eq!(r2["duration_ms"], 6);

    bridge.shutdown().await;
}

#[tokio::test]
async fn submit_is_rejected_before_the_agent_is_ready() {
    // An agent that never announces itself keeps the bridge in spawning.
    let config = script_config("sleep 30");
    let mut bridge = start_bridge(&config);
    let client = bridge.hub.register().await;

    bridge.wait_for_state(SupervisorState::Spawning).await;

    let err = bridge
        .hub
        .submit(client.id, "too early".to_owned())
        .await
        .expect_err("submit must fail before init");
    assert_eq!(err.to_string(), "agent unavailable: agent is not running");

    bridge.shutdown().await;
}
