//! Agent stream reader task.
//!
//! Reads newline-delimited JSON from the subprocess stdout, parses each
//! line into an [`AgentMessage`], and forwards messages through a tokio
//! [`mpsc`] channel in production order.
//!
//! The reader is driven by [`FramedRead`] backed by [`BridgeCodec`],
//! which enforces the 1 MiB per-line limit before any heap allocation
//! for JSON parsing. Malformed lines are skipped, never fatal; channel
//! closure on exit is the stream-ended signal for the receiving side.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::wire::codec::BridgeCodec;
use crate::wire::message::{parse_line, AgentMessage};
use crate::{AppError, Result};

/// Reader task — frames subprocess stdout and emits [`AgentMessage`]s.
///
/// Each decoded line goes through [`parse_line`]; any resulting message
/// is sent through `msg_tx`. Exits on clean EOF, unrecoverable I/O
/// error, cancellation, or a closed receiver; in every case the sender
/// is dropped, which the consuming side observes as end of stream.
///
/// Framing errors (line too long) and parse errors (malformed JSON,
/// bad body for a known tag) are logged and skipped — they do **not**
/// terminate the reader.
///
/// # Errors
///
/// Returns `Ok(())` on every exit path; failures are conveyed by
/// dropping `msg_tx`.
pub async fn run_reader<R>(
    generation: u64,
    stdout: R,
    msg_tx: mpsc::Sender<AgentMessage>,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, BridgeCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(generation, "reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        // EOF — agent stdout closed.
                        debug!(generation, "reader: EOF detected");
                        break;
                    }

                    Some(Err(AppError::Frame(ref msg))) => {
                        // Codec-level error (e.g. line too long) — log and continue.
                        warn!(
                            generation,
                            error = msg.as_str(),
                            "reader: framing error, skipping"
                        );
                    }

                    Some(Err(e)) => {
                        // I/O error on the underlying stream — non-recoverable.
                        warn!(generation, error = %e, "reader: IO error, stopping");
                        break;
                    }

                    Some(Ok(line)) => {
                        match parse_line(&line) {
                            Ok(Some(message)) => {
                                if msg_tx.send(message).await.is_err() {
                                    debug!(generation, "reader: msg_tx closed, stopping");
                                    break;
                                }
                            }
                            Ok(None) => {
                                // Empty line or unknown tag — silently skipped.
                            }
                            Err(e) => {
                                warn!(
                                    generation,
                                    error = %e,
                                    raw_line = %line,
                                    "reader: parse error, skipping line"
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    Ok(())
}
