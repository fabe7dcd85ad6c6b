//! Agent subprocess spawner.
//!
//! Spawns the agent CLI with:
//! - `kill_on_drop(true)` so the process is cleaned up automatically.
//! - Piped stdin/stdout/stderr; stdout carries the NDJSON stream, stderr
//!   is drained into the log.
//! - The configured workspace root as the working directory.
//!
//! Readiness is a protocol-level concern: the Supervisor treats the
//! agent's first `init` message as the ready signal and enforces its own
//! deadline, so the spawner returns as soon as the pipes are captured.

use std::path::PathBuf;
use std::process::ExitStatus;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::BridgeConfig;
use crate::{AppError, Result};

// ── Configuration ────────────────────────────────────────────────────────────

/// Configuration for spawning the agent subprocess.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Host CLI binary (e.g., `claude`).
    pub host_cli: String,
    /// Arguments passed to the host CLI.
    pub host_cli_args: Vec<String>,
    /// Working directory for the child; inherited when `None`.
    pub workspace_root: Option<PathBuf>,
}

impl From<&BridgeConfig> for SpawnConfig {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            host_cli: config.host_cli.clone(),
            host_cli_args: config.host_cli_args.clone(),
            workspace_root: config.workspace_root.clone(),
        }
    }
}

// ── Process handle ───────────────────────────────────────────────────────────

/// Captured stdio of a live agent subprocess.
///
/// The caller is responsible for keeping `child` alive (it has
/// `kill_on_drop(true)`), forwarding envelopes through `stdin`, and
/// framing messages from `stdout`.
#[derive(Debug)]
pub struct AgentProcess {
    /// Child process handle — kept alive so `kill_on_drop` works.
    pub child: Child,
    /// Agent's stdin for outbound NDJSON envelopes.
    pub stdin: ChildStdin,
    /// Agent's stdout carrying the NDJSON message stream.
    pub stdout: ChildStdout,
    /// Agent's stderr, drained into the log.
    pub stderr: ChildStderr,
}

// ── Spawner ──────────────────────────────────────────────────────────────────

/// Spawn the agent subprocess and capture its stdio pipes.
///
/// # Errors
///
/// - `AppError::Agent("failed to spawn agent: …")` — OS spawn failure.
/// - `AppError::Agent("failed to capture agent …")` — a requested pipe
///   was not available on the spawned child.
pub fn spawn_agent(config: &SpawnConfig) -> Result<AgentProcess> {
    let mut cmd = Command::new(&config.host_cli);

    for arg in &config.host_cli_args {
        cmd.arg(arg);
    }

    if let Some(root) = &config.workspace_root {
        cmd.current_dir(root);
    }

    cmd.stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Agent(format!("failed to spawn agent: {err}")))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Agent("failed to capture agent stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Agent("failed to capture agent stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Agent("failed to capture agent stderr".into()))?;

    Ok(AgentProcess {
        child,
        stdin,
        stdout,
        stderr,
    })
}

// ── Stderr drain ─────────────────────────────────────────────────────────────

/// Spawn a background task that logs each stderr line at `DEBUG`.
///
/// Draining keeps the child from blocking on a full stderr pipe and
/// preserves agent diagnostics in the bridge log. The task exits on
/// stderr EOF or cancellation.
#[must_use]
pub fn drain_stderr(
    generation: u64,
    stderr: ChildStderr,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,

                line = lines.next_line() => {
                    match line {
                        Ok(Some(text)) => {
                            debug!(generation, line = text.as_str(), "agent stderr");
                        }
                        Ok(None) | Err(_) => break,
                    }
                }
            }
        }
    })
}

/// Human-readable description of a child exit status.
#[must_use]
pub fn exit_reason(status: ExitStatus) -> String {
    status.code().map_or_else(
        || "process terminated by signal".to_owned(),
        |c| format!("process exited with code {c}"),
    )
}
