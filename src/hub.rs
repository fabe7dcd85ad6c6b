//! Client hub: registration, fan-out, and the turn queue.
//!
//! Every connected client owns a bounded outbound channel of
//! pre-serialized frames; [`ClientHub::broadcast`] serializes once and
//! `try_send`s to each, so one stalled socket never blocks the others.
//! A connection whose buffer is full is forcibly unregistered.
//!
//! User turns from all clients land in one FIFO queue; the head is
//! dispatched to the agent only after the previous turn reached its
//! terminal result, which keeps concurrent clients' turns from
//! interleaving on the wire.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::models::session::SessionView;
use crate::models::turn::PendingTurn;
use crate::supervisor::SupervisorState;
use crate::wire::message::{encode_user_message, AgentMessage};
use crate::{AppError, Result};

/// Handle to one registered client connection.
#[derive(Debug)]
struct ClientHandle {
    /// Pre-serialized outbound frames toward the connection's socket.
    tx: mpsc::Sender<String>,
    /// Connect timestamp.
    connected_at: DateTime<Utc>,
}

/// Receiving side of a fresh registration, handed to the transport.
#[derive(Debug)]
pub struct ClientRegistration {
    /// Identifier assigned to the connection.
    pub id: Uuid,
    /// Outbound frame stream to drain into the socket.
    pub rx: mpsc::Receiver<String>,
}

/// Mutable hub state guarded by one lock.
#[derive(Debug, Default)]
struct HubState {
    clients: HashMap<Uuid, ClientHandle>,
    queue: VecDeque<PendingTurn>,
    turn_in_flight: bool,
    agent_tx: Option<mpsc::Sender<serde_json::Value>>,
}

/// Fan-out hub shared by the transport layer and the supervisor.
#[derive(Debug)]
pub struct ClientHub {
    state: Mutex<HubState>,
    config: ClientConfig,
    supervisor_rx: watch::Receiver<SupervisorState>,
    view_rx: watch::Receiver<SessionView>,
    client_count: AtomicUsize,
}

impl ClientHub {
    /// Create a hub reading supervisor and session state from `watch` copies.
    #[must_use]
    pub fn new(
        config: ClientConfig,
        supervisor_rx: watch::Receiver<SupervisorState>,
        view_rx: watch::Receiver<SessionView>,
    ) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            config,
            supervisor_rx,
            view_rx,
            client_count: AtomicUsize::new(0),
        }
    }

    /// Register a new client connection.
    ///
    /// The client immediately receives a replay of the current session's
    /// `init` (when one exists) so a late joiner learns the session
    /// identity; prior assistant content is not replayed.
    pub async fn register(&self) -> ClientRegistration {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.config.outbound_buffer);

        let mut state = self.state.lock().await;

        let replay = {
            let view = self.view_rx.borrow();
            view.session
                .as_ref()
                .filter(|session| !session.id.is_empty())
                .map(AgentMessage::init_replay)
        };
        if let Some(message) = replay {
            match serde_json::to_string(&message) {
                // The channel is freshly created, so this send cannot fail.
                Ok(frame) => {
                    let _ = tx.try_send(frame);
                }
                Err(err) => warn!(%err, "failed to serialize init replay"),
            }
        }

        state.clients.insert(
            id,
            ClientHandle {
                tx,
                connected_at: Utc::now(),
            },
        );
        self.client_count.store(state.clients.len(), Ordering::Relaxed);
        info!(client_id = %id, clients = state.clients.len(), "client registered");

        ClientRegistration { id, rx }
    }

    /// Remove a client connection; idempotent.
    pub async fn unregister(&self, id: Uuid) {
        let mut state = self.state.lock().await;
        if state.clients.remove(&id).is_some() {
            self.client_count.store(state.clients.len(), Ordering::Relaxed);
            info!(client_id = %id, clients = state.clients.len(), "client unregistered");
        }
    }

    /// Deliver one message to every registered client.
    ///
    /// Serializes once, then `try_send`s the frame to each connection.
    /// A client whose buffer is full is disconnected rather than allowed
    /// to stall the broadcast.
    pub async fn broadcast(&self, message: &AgentMessage) {
        let frame = match serde_json::to_string(message) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%err, "failed to serialize outbound message");
                return;
            }
        };

        let mut state = self.state.lock().await;
        let mut dropped: Vec<Uuid> = Vec::new();

        for (id, handle) in &state.clients {
            match handle.tx.try_send(frame.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        client_id = %id,
                        connected_at = %handle.connected_at,
                        "client outbound buffer full, disconnecting slow consumer"
                    );
                    dropped.push(*id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(client_id = %id, "client channel closed, removing");
                    dropped.push(*id);
                }
            }
        }

        for id in dropped {
            state.clients.remove(&id);
        }
        self.client_count.store(state.clients.len(), Ordering::Relaxed);
    }

    /// Deliver one message to a single client, best effort.
    pub async fn send_to(&self, client_id: Uuid, message: &AgentMessage) {
        let frame = match serde_json::to_string(message) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%err, "failed to serialize direct message");
                return;
            }
        };

        let state = self.state.lock().await;
        if let Some(handle) = state.clients.get(&client_id) {
            if handle.tx.try_send(frame).is_err() {
                debug!(client_id = %client_id, "direct send failed, frame dropped");
            }
        }
    }

    /// Queue one user turn for dispatch to the agent.
    ///
    /// Turns queue in arrival order across all clients; the head is sent
    /// once no other turn is in flight.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Unavailable`] when the supervisor is not in
    /// the `running` state; the turn is not queued in that case.
    pub async fn submit(&self, client_id: Uuid, text: String) -> Result<()> {
        if *self.supervisor_rx.borrow() != SupervisorState::Running {
            return Err(AppError::Unavailable("agent is not running".into()));
        }

        let mut state = self.state.lock().await;
        state.queue.push_back(PendingTurn::new(text, client_id));
        debug!(client_id = %client_id, queued = state.queue.len(), "turn queued");
        Self::dispatch_locked(&mut state);
        Ok(())
    }

    /// Attach the live agent's stdin channel and kick the queue.
    ///
    /// Called by the supervisor on each successful `init`. Any turn the
    /// previous process left in flight is considered gone; the queue
    /// resumes from its head.
    pub async fn attach_agent(&self, tx: mpsc::Sender<serde_json::Value>) {
        let mut state = self.state.lock().await;
        state.agent_tx = Some(tx);
        state.turn_in_flight = false;
        debug!(queued = state.queue.len(), "agent attached");
        Self::dispatch_locked(&mut state);
    }

    /// Detach the agent channel after the subprocess died.
    ///
    /// Returns whether a turn was in flight, so the supervisor can
    /// synthesize its terminal result. Queued turns are kept for the
    /// replacement process.
    pub async fn agent_down(&self) -> bool {
        let mut state = self.state.lock().await;
        state.agent_tx = None;
        let was_in_flight = state.turn_in_flight;
        state.turn_in_flight = false;
        was_in_flight
    }

    /// Clear the in-flight flag after a terminal result and dispatch the
    /// next queued turn, if any.
    pub async fn turn_completed(&self) {
        let mut state = self.state.lock().await;
        state.turn_in_flight = false;
        Self::dispatch_locked(&mut state);
    }

    /// Broadcast the final event and drop every delivery path.
    pub async fn shutdown(&self) {
        self.broadcast(&AgentMessage::bridge_event(
            "shutdown",
            serde_json::json!({}),
        ))
        .await;

        let mut state = self.state.lock().await;
        state.clients.clear();
        state.queue.clear();
        state.agent_tx = None;
        self.client_count.store(0, Ordering::Relaxed);
        info!("client hub shut down");
    }

    /// Number of currently registered clients.
    #[must_use]
    pub fn connected_clients(&self) -> usize {
        self.client_count.load(Ordering::Relaxed)
    }

    /// Number of turns waiting behind the in-flight one.
    pub async fn queued_turns(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Whether a turn is currently in flight to the agent.
    pub async fn turn_in_flight(&self) -> bool {
        self.state.lock().await.turn_in_flight
    }

    /// Send the queue head to the agent when nothing is in flight.
    fn dispatch_locked(state: &mut HubState) {
        if state.turn_in_flight {
            return;
        }
        let Some(agent_tx) = state.agent_tx.clone() else {
            return;
        };
        let Some(turn) = state.queue.pop_front() else {
            return;
        };

        let envelope = encode_user_message(&turn.text);
        match agent_tx.try_send(envelope) {
            Ok(()) => {
                state.turn_in_flight = true;
                info!(
                    client_id = %turn.client_id,
                    submitted_at = %turn.submitted_at,
                    "turn dispatched to agent"
                );
            }
            Err(err) => {
                warn!(%err, "agent channel rejected turn, re-queueing");
                state.queue.push_front(turn);
                state.agent_tx = None;
            }
        }
    }
}
