//! HTTP and WebSocket surface for bridge clients.
//!
//! Mounts an axum router with four routes: `GET /ws` upgrades to the
//! bidirectional client WebSocket, `GET /status` serves the current
//! [`StatusSnapshot`], `GET /health` is a plain liveness probe, and
//! `POST /reset` re-arms the supervisor after it has given up.
//!
//! Each WebSocket connection registers with the [`ClientHub`] and runs
//! two halves: a forward task draining the hub's per-client frame
//! channel into the socket, and a receive loop parsing inbound client
//! frames and submitting them as turns.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::hub::ClientHub;
use crate::status::{StatusReporter, StatusSnapshot};
use crate::supervisor::SupervisorCommand;
use crate::wire::message::{parse_client_frame, AgentMessage};
use crate::{AppError, Result};

/// Shared state behind the axum router.
pub struct Gateway {
    hub: Arc<ClientHub>,
    reporter: StatusReporter,
    supervisor_tx: mpsc::Sender<SupervisorCommand>,
    send_timeout: Duration,
}

impl Gateway {
    /// Bundle the hub, reporter, and supervisor command channel for serving.
    #[must_use]
    pub fn new(
        hub: Arc<ClientHub>,
        reporter: StatusReporter,
        supervisor_tx: mpsc::Sender<SupervisorCommand>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            hub,
            reporter,
            supervisor_tx,
            send_timeout: Duration::from_millis(config.send_timeout_ms),
        }
    }
}

/// Build the bridge router over shared [`Gateway`] state.
#[must_use]
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/status", get(status))
        .route("/health", get(health))
        .route("/reset", post(reset))
        .with_state(gateway)
}

/// Bind `127.0.0.1:port` and serve the router until cancellation.
///
/// # Errors
///
/// Returns `AppError::Config` if the listener fails to bind and
/// `AppError::Io` if the server loop fails.
pub async fn serve(gateway: Arc<Gateway>, port: u16, ct: CancellationToken) -> Result<()> {
    let bind = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind gateway on {bind}: {err}")))?;
    serve_on(listener, gateway, ct).await
}

/// Serve the router on an already-bound listener until cancellation.
///
/// # Errors
///
/// Returns `AppError::Io` if the listener address cannot be read or the
/// server loop fails.
pub async fn serve_on(
    listener: TcpListener,
    gateway: Arc<Gateway>,
    ct: CancellationToken,
) -> Result<()> {
    let addr = listener
        .local_addr()
        .map_err(|err| AppError::Io(err.to_string()))?;
    info!(%addr, "starting client gateway");

    axum::serve(listener, router(gateway))
        .with_graceful_shutdown(async move {
            ct.cancelled().await;
        })
        .await
        .map_err(|err| AppError::Io(format!("gateway server error: {err}")))?;

    info!("client gateway shut down");
    Ok(())
}

/// Handler for `GET /health`.
async fn health() -> &'static str {
    "ok"
}

/// Handler for `GET /status`.
async fn status(State(gateway): State<Arc<Gateway>>) -> Json<StatusSnapshot> {
    Json(gateway.reporter.snapshot())
}

/// Handler for `POST /reset`.
///
/// Forwards a reset command to the supervisor and replies with the
/// snapshot taken immediately after. The supervisor ignores the command
/// unless it has given up, so this is safe to call in any state.
async fn reset(State(gateway): State<Arc<Gateway>>) -> Json<StatusSnapshot> {
    if gateway
        .supervisor_tx
        .send(SupervisorCommand::Reset)
        .await
        .is_err()
    {
        warn!("supervisor command channel closed; reset dropped");
    }
    Json(gateway.reporter.snapshot())
}

/// Handler for `GET /ws`.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(gateway): State<Arc<Gateway>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, gateway))
}

/// Run one client connection to completion.
async fn handle_socket(socket: WebSocket, gateway: Arc<Gateway>) {
    let registration = gateway.hub.register().await;
    let client_id = registration.id;
    info!(%client_id, "websocket client connected");

    let (ws_tx, mut ws_rx) = socket.split();
    let mut forward = tokio::spawn(forward_frames(
        client_id,
        registration.rx,
        ws_tx,
        gateway.send_timeout,
    ));

    loop {
        tokio::select! {
            // The forward task ending means the hub dropped this client
            // or the socket stopped accepting writes.
            _ = &mut forward => break,
            incoming = ws_rx.next() => {
                let Some(frame) = incoming else { break };
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => {
                        debug!(%client_id, "client sent close frame");
                        break;
                    }
                    // Ping and pong frames are answered by the socket layer.
                    Ok(_) => continue,
                    Err(err) => {
                        debug!(%client_id, error = %err, "websocket receive error");
                        break;
                    }
                };
                handle_client_frame(&gateway, client_id, text.as_str()).await;
            }
        }
    }

    forward.abort();
    gateway.hub.unregister(client_id).await;
    info!(%client_id, "websocket client disconnected");
}

/// Drain hub frames into the socket until the channel or socket closes.
///
/// A send that stalls past the configured timeout counts as a dead
/// client and ends the task.
async fn forward_frames(
    client_id: Uuid,
    mut frames: mpsc::Receiver<String>,
    mut ws_tx: SplitSink<WebSocket, Message>,
    send_timeout: Duration,
) {
    while let Some(frame) = frames.recv().await {
        match timeout(send_timeout, ws_tx.send(Message::Text(frame.into()))).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!(%client_id, error = %err, "websocket send failed");
                break;
            }
            Err(_) => {
                warn!(%client_id, "websocket send timed out; dropping client");
                break;
            }
        }
    }
    let _ = ws_tx.close().await;
}

/// Parse one inbound text frame and submit it as a turn.
///
/// Malformed frames and rejected submissions are answered with a direct
/// bridge event rather than closing the connection.
async fn handle_client_frame(gateway: &Gateway, client_id: Uuid, raw: &str) {
    let frame = match parse_client_frame(raw) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(%client_id, error = %err, "rejecting malformed client frame");
            let reason = match &err {
                AppError::Frame(msg) => msg.clone(),
                other => other.to_string(),
            };
            let event = AgentMessage::bridge_event(
                "invalid_message",
                serde_json::json!({ "reason": reason }),
            );
            gateway.hub.send_to(client_id, &event).await;
            return;
        }
    };

    if let Err(err) = gateway.hub.submit(client_id, frame.text()).await {
        let reason = match &err {
            AppError::Unavailable(msg) => msg.clone(),
            other => other.to_string(),
        };
        debug!(%client_id, %reason, "turn rejected");
        let event = AgentMessage::bridge_event(
            "agent_unavailable",
            serde_json::json!({ "reason": reason }),
        );
        gateway.hub.send_to(client_id, &event).await;
    }
}
