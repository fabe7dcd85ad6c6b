//! Unit tests for the agent stream reader task.
//!
//! Drives `run_reader` with in-memory byte streams instead of a live
//! subprocess, covering:
//! - ordered delivery and channel closure at EOF
//! - malformed and unknown lines skipped without terminating the stream
//! - cancellation and closed-receiver exits

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use agent_bridge::wire::message::AgentMessage;
use agent_bridge::wire::reader::run_reader;

/// Run the reader over `input` and collect everything it emits.
async fn read_all(input: &[u8]) -> Vec<AgentMessage> {
    let (tx, mut rx) = mpsc::channel(32);
    run_reader(1, input, tx, CancellationToken::new())
        .await
        .expect("reader exits cleanly");

    let mut messages = Vec::new();
    while let Some(msg) = rx.recv().await {
        messages.push(msg);
    }
    messages
}

#[tokio::test]
async fn emits_messages_in_stream_order_then_closes() {
    let input = b"{\"type\":\"system\",\"subtype\":\"init\",\"session_id\":\"s\",\"model\":\"m\",\"tools\":[]}\n\
                  {\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"hi\"}]}}\n\
                  {\"type\":\"result\",\"subtype\":\"success\"}\n";

    let messages = read_all(input).await;
    assert_eq!(messages.len(), 3);
    assert!(matches!(messages[0], AgentMessage::System(_)));
    assert!(matches!(messages[1], AgentMessage::Assistant(_)));
    assert!(matches!(messages[2], AgentMessage::Result(_)));
}

#[tokio::test]
async fn empty_stream_closes_channel_without_messages() {
    let messages = read_all(b"").await;
    assert!(messages.is_empty());
}

#[tokio::test]
async fn malformed_line_is_skipped_not_fatal() {
    let input = b"{\"type\":\"result\",\"subtype\":\"success\"}\n\
                  {broken json\n\
                  {\"type\":\"result\",\"subtype\":\"error\"}\n";

    let messages = read_all(input).await;
    assert_eq!(messages.len(), 2, "both valid lines must survive the bad one");
    assert!(matches!(messages[0], AgentMessage::Result(_)));
    assert!(matches!(messages[1], AgentMessage::Result(_)));
}

#[tokio::test]
async fn unknown_tags_and_blank_lines_are_skipped() {
    let input = b"\n\
                  {\"type\":\"telemetry\",\"value\":1}\n\
                  {\"type\":\"result\",\"subtype\":\"success\"}\n";

    let messages = read_all(input).await;
    assert_eq!(messages.len(), 1);
    assert!(matches!(messages[0], AgentMessage::Result(_)));
}

#[tokio::test]
async fn final_line_without_newline_is_flushed_at_eof() {
    let input = b"{\"type\":\"result\",\"subtype\":\"success\"}";

    let messages = read_all(input).await;
    assert_eq!(messages.len(), 1, "unterminated final line must still decode");
}

#[tokio::test]
async fn pre_cancelled_token_stops_reader_immediately() {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let (tx, mut rx) = mpsc::channel(8);
    let input: &[u8] = b"{\"type\":\"result\",\"subtype\":\"success\"}\n";
    run_reader(1, input, tx, cancel).await.expect("reader exits cleanly");

    assert!(rx.recv().await.is_none(), "cancelled reader must emit nothing");
}

#[tokio::test]
async fn closed_receiver_stops_reader() {
    let (tx, rx) = mpsc::channel(8);
    drop(rx);

    let input: &[u8] = b"{\"type\":\"result\",\"subtype\":\"success\"}\n\
                        {\"type\":\"result\",\"subtype\":\"success\"}\n";
    // Must return rather than hang once the receiving side is gone.
    run_reader(1, input, tx, CancellationToken::new())
        .await
        .expect("reader exits cleanly");
}
