//! Agent stream writer task.
//!
//! Receives outbound JSON envelopes from a tokio [`mpsc`] channel,
//! serialises each value to a single-line JSON string, and writes the
//! NDJSON line to the subprocess stdin using
//! [`tokio::io::AsyncWriteExt`]. Each serialised message is terminated
//! by a `\n` byte, as the agent CLI's stream input requires.

use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Writer task — serialises outbound envelopes and writes to `stdin`.
///
/// The task exits cleanly when:
/// - `cancel` is triggered (graceful shutdown), or
/// - `msg_rx` is closed (all senders dropped), or
/// - a write fails (the agent process has exited).
///
/// # Errors
///
/// - [`AppError::Frame`]`("failed to serialise outbound message: …")` if
///   [`serde_json::to_vec`] fails (should not occur for `Value`).
/// - [`AppError::Agent`]`("stdin write failed: …")` if the write to
///   `stdin` fails.
pub async fn run_writer(
    generation: u64,
    mut stdin: ChildStdin,
    mut msg_rx: mpsc::Receiver<serde_json::Value>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(generation, "writer: cancellation received, stopping");
                break;
            }

            msg = msg_rx.recv() => {
                match msg {
                    None => {
                        debug!(generation, "writer: message channel closed, stopping");
                        break;
                    }
                    Some(value) => {
                        let mut bytes = serde_json::to_vec(&value).map_err(|e| {
                            AppError::Frame(format!(
                                "failed to serialise outbound message: {e}"
                            ))
                        })?;

                        // NDJSON: append the newline delimiter.
                        bytes.push(b'\n');

                        stdin.write_all(&bytes).await.map_err(|e| {
                            warn!(generation, error = %e, "writer: write to stdin failed");
                            AppError::Agent(format!("stdin write failed: {e}"))
                        })?;
                        stdin.flush().await.map_err(|e| {
                            AppError::Agent(format!("stdin flush failed: {e}"))
                        })?;
                    }
                }
            }
        }
    }

    Ok(())
}
