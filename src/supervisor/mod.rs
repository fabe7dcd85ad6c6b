//! Agent subprocess supervision.
//!
//! The supervisor owns the subprocess lifecycle: spawn, monitor,
//! respawn with bounded backoff, graceful termination. Its task also
//! runs the sequential message pump — parsed messages mutate session
//! state and fan out to clients from one loop, so broadcast order is
//! exactly the order the stream produced.
//!
//! - [`spawner`]: process spawning and stdio capture.
//! - [`tracker`]: session state holder publishing `watch` copies.

pub mod spawner;
pub mod tracker;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{BackoffCurve, BridgeConfig, RespawnConfig};
use crate::hub::ClientHub;
use crate::models::session::SessionView;
use crate::supervisor::spawner::{drain_stderr, exit_reason, spawn_agent, AgentProcess, SpawnConfig};
use crate::supervisor::tracker::SessionTracker;
use crate::wire::message::AgentMessage;
use crate::wire::{reader, writer};

/// Upper bound on the exponential backoff delay.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Capacity of the parsed-message channel between reader and pump.
const PUMP_BUFFER: usize = 256;

/// Capacity of the outbound envelope channel toward the agent stdin.
const OUTBOUND_BUFFER: usize = 64;

/// Lifecycle state of the supervised subprocess.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    /// No subprocess; supervision not started or shut down.
    Stopped,
    /// Subprocess launched, awaiting its `init` announcement.
    Spawning,
    /// `init` received; the agent accepts turns.
    Running,
    /// Subprocess exited cleanly with no turn outstanding.
    Exited,
    /// Subprocess died unexpectedly or missed the init deadline.
    Crashed,
    /// Waiting out the backoff delay before the next spawn attempt.
    Respawning,
    /// Respawn attempts exhausted; suspended until a manual reset.
    GaveUp,
}

/// Operator commands accepted by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorCommand {
    /// Re-arm respawning from `gave_up`; ignored in any other state.
    Reset,
}

/// How a supervised process generation came to an end.
enum ProcessOutcome {
    /// Cancellation fired; the child has been terminated.
    Shutdown,
    /// The process ended on its own or failed to start.
    Ended {
        exit_ok: bool,
        had_init: bool,
        reason: String,
    },
}

/// Supervisor of the agent subprocess and driver of the message pump.
pub struct Supervisor {
    spawn_config: SpawnConfig,
    respawn: RespawnConfig,
    hub: Arc<ClientHub>,
    state_tx: watch::Sender<SupervisorState>,
    tracker: SessionTracker,
    command_rx: mpsc::Receiver<SupervisorCommand>,
    cancel: CancellationToken,
    generation: u64,
}

impl Supervisor {
    /// Assemble a supervisor from configuration and shared channels.
    #[must_use]
    pub fn new(
        config: &BridgeConfig,
        hub: Arc<ClientHub>,
        state_tx: watch::Sender<SupervisorState>,
        view_tx: watch::Sender<SessionView>,
        command_rx: mpsc::Receiver<SupervisorCommand>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            spawn_config: SpawnConfig::from(config),
            respawn: config.respawn.clone(),
            hub,
            state_tx,
            tracker: SessionTracker::new(view_tx),
            command_rx,
            cancel,
            generation: 0,
        }
    }

    /// Run the supervision loop until cancellation.
    ///
    /// Each iteration spawns one process generation and pumps its stream
    /// to completion. Failures feed the respawn policy; exhausting the
    /// attempt cap parks the loop in `gave_up` until a [`Reset`] command
    /// arrives.
    ///
    /// [`Reset`]: SupervisorCommand::Reset
    pub async fn run(mut self) {
        // Counts consecutive failed generations; a successful init resets it.
        let mut attempts: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.generation += 1;
            self.set_state(SupervisorState::Spawning);
            self.tracker.begin_spawning();

            match self.run_process().await {
                ProcessOutcome::Shutdown => {
                    self.hub.agent_down().await;
                    break;
                }
                ProcessOutcome::Ended {
                    exit_ok,
                    had_init,
                    reason,
                } => {
                    self.handle_process_down(exit_ok, &reason).await;

                    if had_init {
                        attempts = 0;
                    }
                    attempts += 1;

                    if attempts > self.respawn.max_attempts {
                        self.enter_gave_up().await;
                        if !self.wait_for_reset().await {
                            break;
                        }
                        attempts = 0;
                        continue;
                    }

                    if !self.backoff_pause(attempts, &reason).await {
                        break;
                    }
                }
            }
        }

        self.set_state(SupervisorState::Stopped);
        info!("supervisor stopped");
    }

    /// Spawn one process generation and pump its stream until it ends.
    async fn run_process(&mut self) -> ProcessOutcome {
        let generation = self.generation;
        info!(
            generation,
            cli = self.spawn_config.host_cli.as_str(),
            "spawning agent subprocess"
        );

        let process = match spawn_agent(&self.spawn_config) {
            Ok(process) => process,
            Err(err) => {
                error!(generation, %err, "agent spawn failed");
                return ProcessOutcome::Ended {
                    exit_ok: false,
                    had_init: false,
                    reason: err.to_string(),
                };
            }
        };

        let AgentProcess {
            mut child,
            stdin,
            stdout,
            stderr,
        } = process;

        // Per-generation cancellation scope for the stream tasks.
        let scope = self.cancel.child_token();
        let (msg_tx, mut msg_rx) = mpsc::channel::<AgentMessage>(PUMP_BUFFER);
        let (out_tx, out_rx) = mpsc::channel::<serde_json::Value>(OUTBOUND_BUFFER);

        let reader_task = tokio::spawn(reader::run_reader(
            generation,
            stdout,
            msg_tx,
            scope.clone(),
        ));
        let writer_task = tokio::spawn(writer::run_writer(generation, stdin, out_rx, scope.clone()));
        let stderr_task = drain_stderr(generation, stderr, scope.clone());

        let mut had_init = false;
        let mut commands_open = true;
        let init_deadline = tokio::time::sleep(Duration::from_millis(self.respawn.init_deadline_ms));
        tokio::pin!(init_deadline);

        let outcome = loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    info!(generation, "shutdown requested, terminating agent");
                    self.terminate(&mut child).await;
                    break ProcessOutcome::Shutdown;
                }

                () = &mut init_deadline, if !had_init => {
                    warn!(
                        generation,
                        deadline_ms = self.respawn.init_deadline_ms,
                        "agent missed the init deadline, treating as crash"
                    );
                    self.terminate(&mut child).await;
                    break ProcessOutcome::Ended {
                        exit_ok: false,
                        had_init: false,
                        reason: "init deadline elapsed".into(),
                    };
                }

                // Drain stray commands so a stale reset cannot re-arm a
                // later gave_up; a closed channel disables the arm.
                cmd = self.command_rx.recv(), if commands_open => {
                    match cmd {
                        Some(cmd) => debug!(generation, ?cmd, "command ignored while agent is active"),
                        None => commands_open = false,
                    }
                }

                message = msg_rx.recv() => {
                    match message {
                        Some(message) => {
                            self.pump_message(&message, &out_tx, &mut had_init).await;
                        }
                        None => {
                            // Reader saw EOF; every parsed message has been
                            // pumped, so the stream order is fully delivered.
                            debug!(generation, "agent stream closed, collecting exit status");
                            let (exit_ok, reason) = self.collect_exit(&mut child).await;
                            warn!(generation, reason = reason.as_str(), "agent process ended");
                            break ProcessOutcome::Ended { exit_ok, had_init, reason };
                        }
                    }
                }
            }
        };

        // Stop this generation's stream tasks before the next spawn.
        scope.cancel();
        let _ = reader_task.await;
        let _ = writer_task.await;
        let _ = stderr_task.await;

        outcome
    }

    /// Collect the exit status once the stdout stream has closed.
    ///
    /// A closed stdout normally means the process is already gone; one
    /// that lingers past the grace period is terminated.
    async fn collect_exit(&self, child: &mut Child) -> (bool, String) {
        let grace = Duration::from_millis(self.respawn.shutdown_grace_ms);
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => (status.success(), exit_reason(status)),
            Ok(Err(err)) => (false, format!("wait error: {err}")),
            Err(_) => {
                self.terminate(child).await;
                (false, "stdout closed without process exit".to_owned())
            }
        }
    }

    /// Route one parsed message through state, fan-out, and dispatch.
    async fn pump_message(
        &mut self,
        message: &AgentMessage,
        out_tx: &mpsc::Sender<serde_json::Value>,
        had_init: &mut bool,
    ) {
        if let AgentMessage::System(payload) = message {
            if payload.subtype == "init" && !*had_init {
                *had_init = true;
                info!(
                    generation = self.generation,
                    session_id = payload.session_id.as_deref().unwrap_or_default(),
                    model = payload.model.as_deref().unwrap_or_default(),
                    "agent initialized"
                );
                self.set_state(SupervisorState::Running);
                self.hub.attach_agent(out_tx.clone()).await;
            }
        }

        self.tracker.apply(message);
        self.hub.broadcast(message).await;

        if matches!(message, AgentMessage::Result(_)) {
            self.hub.turn_completed().await;
        }
    }

    /// Crash bookkeeping shared by every process-down path.
    async fn handle_process_down(&mut self, exit_ok: bool, reason: &str) {
        self.tracker.mark_errored();
        let turn_in_flight = self.hub.agent_down().await;

        if turn_in_flight {
            // Unblock every client waiting on the interrupted turn.
            let synthesized =
                AgentMessage::error_result(&format!("agent process failed: {reason}"));
            self.hub.broadcast(&synthesized).await;
        }

        let state = if exit_ok && !turn_in_flight {
            SupervisorState::Exited
        } else {
            SupervisorState::Crashed
        };
        self.set_state(state);
    }

    /// Announce the respawn attempt and wait out the backoff delay.
    ///
    /// Returns `false` when cancellation fired during the pause.
    async fn backoff_pause(&mut self, attempt: u32, reason: &str) -> bool {
        self.set_state(SupervisorState::Respawning);
        let delay = backoff_delay(&self.respawn, attempt);
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);

        self.hub
            .broadcast(&AgentMessage::bridge_event(
                "respawning",
                json!({
                    "attempt": attempt,
                    "max_attempts": self.respawn.max_attempts,
                    "delay_ms": delay_ms,
                }),
            ))
            .await;
        info!(
            attempt,
            max_attempts = self.respawn.max_attempts,
            delay_ms,
            reason,
            "scheduling agent respawn"
        );

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        let mut commands_open = true;
        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => return false,

                cmd = self.command_rx.recv(), if commands_open => {
                    match cmd {
                        Some(cmd) => debug!(?cmd, "command ignored during respawn backoff"),
                        None => commands_open = false,
                    }
                }

                () = &mut sleep => return true,
            }
        }
    }

    /// Park in `gave_up` and tell every client the agent is out of service.
    async fn enter_gave_up(&mut self) {
        self.set_state(SupervisorState::GaveUp);
        self.hub
            .broadcast(&AgentMessage::bridge_event(
                "gave_up",
                json!({ "attempts": self.respawn.max_attempts }),
            ))
            .await;
        warn!(
            attempts = self.respawn.max_attempts,
            "respawn attempts exhausted, supervision suspended until reset"
        );
    }

    /// Block until a reset command arrives; `false` means cancellation.
    async fn wait_for_reset(&mut self) -> bool {
        tokio::select! {
            biased;

            () = self.cancel.cancelled() => false,

            cmd = self.command_rx.recv() => match cmd {
                Some(SupervisorCommand::Reset) => {
                    info!("manual reset received, re-arming respawn");
                    true
                }
                None => {
                    // No command source remains; park until shutdown.
                    self.cancel.cancelled().await;
                    false
                }
            },
        }
    }

    /// Terminate the child: signal, bounded grace wait, then force kill.
    async fn terminate(&self, child: &mut Child) {
        send_term_signal(child);

        let grace = Duration::from_millis(self.respawn.shutdown_grace_ms);
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(exit)) => info!(?exit, "agent exited within grace period"),
            Ok(Err(err)) => warn!(%err, "error waiting for agent exit"),
            Err(_) => {
                warn!("agent did not exit within grace period, forcing kill");
                if let Err(err) = child.kill().await {
                    warn!(%err, "failed to force-kill agent");
                }
            }
        }
    }

    fn set_state(&self, state: SupervisorState) {
        if *self.state_tx.borrow() != state {
            info!(state = ?state, "supervisor state change");
            self.state_tx.send_replace(state);
        }
    }
}

/// Delay before respawn attempt `attempt` (1-based) under `config`.
#[must_use]
pub fn backoff_delay(config: &RespawnConfig, attempt: u32) -> Duration {
    let base = Duration::from_millis(config.delay_ms);
    match config.backoff {
        BackoffCurve::Fixed => base,
        BackoffCurve::Exponential => {
            let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
            base.saturating_mul(factor).min(MAX_BACKOFF)
        }
    }
}

/// Send the platform's graceful termination signal to the child.
#[cfg(unix)]
fn send_term_signal(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        debug!(%err, "SIGTERM delivery failed (process may already be dead)");
    }
}

/// Windows has no graceful signal; request an immediate kill and let the
/// grace wait reap it.
#[cfg(not(unix))]
fn send_term_signal(child: &mut Child) {
    if let Err(err) = child.start_kill() {
        debug!(%err, "kill request failed (process may already be dead)");
    }
}
