//! Graceful shutdown ordering.
//!
//! Cancellation must terminate the subprocess, deliver one final
//! `shutdown` event to every client, and leave the supervisor stopped.

use std::sync::Arc;
use std::time::Instant;

use agent_bridge::supervisor::SupervisorState;

use super::test_helpers::{frame_where, script_config, start_bridge};

#[tokio::test]
async fn shutdown_notifies_clients_before_closing_their_channels() {
    let script = r#"
echo '{"type":"system","subtype":"init","session_id":"fake-10","model":"fake-model","tools":[]}'
sleep 30
"#;
    let config = script_config(script);
    let mut bridge = start_bridge(&config);
    let mut client = bridge.hub.register().await;

    bridge.wait_for_state(SupervisorState::Running).await;
    frame_where(&mut client.rx, |f| f["subtype"] == "init").await;

    let state_rx = bridge.state_rx.clone();
    bridge.shutdown().await;

    // The last frame each client sees is the shutdown event.
    let event = frame_where(&mut client.rx, |f| f["subtype"] == "shutdown").await;
    assert_eq!(event["type"], "system");
    assert!(
        client.rx.recv().await.is_none(),
        "channel must close after the shutdown event"
    );

    assert_eq!(*state_rx.borrow(), SupervisorState::Stopped);
}

#[tokio::test]
async fn sigterm_immune_agent_is_force_killed_after_the_grace_period() {
    // Ignores the termination signal; only the force kill can end it.
    let script = r#"
trap '' TERM
echo '{"type":"system","subtype":"init","session_id":"fake-11","model":"fake-model","tools":[]}'
sleep 30
"#;
    let config = script_config(script);
    let grace_ms = config.respawn.shutdown_grace_ms;
    let mut bridge = start_bridge(&config);

    bridge.wait_for_state(SupervisorState::Running).await;

    let started = Instant::now();
    bridge.shutdown().await;
    let elapsed = started.elapsed();

    assert!(
        elapsed.as_millis() >= u128::from(grace_ms) - 100,
        "shutdown returned before the grace period could elapse: {elapsed:?}"
    );
}

#[tokio::test]
async fn stopped_bridge_refuses_new_turns() {
    let script = r#"
echo '{"type":"system","subtype":"init","session_id":"fake-12","model":"fake-model","tools":[]}'
sleep 30
"#;
    let config = script_config(script);
    let mut bridge = start_bridge(&config);
    let client = bridge.hub.register().await;

    bridge.wait_for_state(SupervisorState::Running).await;

    let hub = Arc::clone(&bridge.hub);
    bridge.shutdown().await;

    let err = hub
        .submit(client.id, "too late".to_owned())
        .await
        .expect_err("turns must be refused after shutdown");
    assert_eq!(err.to_string(), "agent unavailable: agent is not running");
}
