//! Respawn cap exhaustion and manual re-arming.
//!
//! Fake agents that can never come up drive the supervisor through its
//! full attempt budget; tests pin the announcement sequence, the
//! suspended state, and the reset path out of it.

use agent_bridge::supervisor::{SupervisorCommand, SupervisorState};

use super::test_helpers::{frame_where, next_frame, script_config, start_bridge};

#[tokio::test]
async fn exhausting_attempts_announces_each_respawn_then_gives_up() {
    // Exits before ever announcing itself, every generation.
    let config = script_config("exit 1");
    let mut bridge = start_bridge(&config);
    let mut client = bridge.hub.register().await;

    // The only frames on the wire are bridge events, in strict order.
    for attempt in 1..=3 {
        let frame = next_frame(&mut client.rx).await;
        assert_eq!(frame["subtype"], "respawning", "frame: {frame}");
        assert_eq!(frame["data"]["attempt"], attempt);
        assert_eq!(frame["data"]["max_attempts"], 3);
    }

    let gave_up = next_frame(&mut client.rx).await;
    assert_eq!(gave_up["subtype"], "gave_up");
    assert_eq!(gave_up["data"]["attempts"], 3);

    bridge.wait_for_state(SupervisorState::GaveUp).await;

    // Suspended: turns are refused until an operator intervenes.
    let err = bridge
        .hub
        .submit(client.id, "anyone there?".to_owned())
        .await
        .expect_err("submit must fail after giving up");
    assert_eq!(err.to_string(), "agent unavailable: agent is not running");

    bridge.shutdown().await;
}

#[tokio::test]
async fn reset_rearms_the_attempt_budget() {
    let config = script_config("exit 1");
    let mut bridge = start_bridge(&config);
    let mut client = bridge.hub.register().await;

    frame_where(&mut client.rx, |f| f["subtype"] == "gave_up").await;
    bridge.wait_for_state(SupervisorState::GaveUp).await;

    bridge
        .command_tx
        .send(SupervisorCommand::Reset)
        .await
        .expect("send reset");

    // A fresh cycle starts with the attempt counter back at one.
    let respawning = frame_where(&mut client.rx, |f| f["subtype"] == "respawning").await;
    assert_eq!(respawning["data"]["attempt"], 1);

    bridge.shutdown().await;
}

#[tokio::test]
async fn unspawnable_binary_also_exhausts_the_cap() {
    let mut config = script_config("unused");
    config.host_cli = "/nonexistent/agent-binary".to_owned();
    config.host_cli_args = vec![];

    let mut bridge = start_bridge(&config);
    let mut client = bridge.hub.register().await;

    let gave_up = frame_where(&mut client.rx, |f| f["subtype"] == "gave_up").await;
    assert_eq!(gave_up["data"]["attempts"], 3);
    bridge.wait_for_state(SupervisorState::GaveUp).await;

    bridge.shutdown().await;
}
