//! NDJSON codec for the agent subprocess stream.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a fixed maximum line
//! length to prevent memory exhaustion caused by unterminated or
//! maliciously large messages from a misbehaving agent process.
//!
//! # Usage
//!
//! Use [`BridgeCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedRead`] over the child's stdout. Framing is
//! UTF-8 lines delimited by `\n`; each complete line is one message.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum line length accepted by the codec: 1 MiB.
///
/// Lines exceeding this limit on the inbound stream cause
/// [`BridgeCodec::decode`] to return [`AppError::Frame`] with
/// `"line too long"` rather than allocating unbounded memory for a
/// single message.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// NDJSON line codec for the agent subprocess stream.
///
/// Delegates line-framing to [`LinesCodec`] with a fixed
/// [`MAX_LINE_BYTES`] limit. Incomplete trailing data stays buffered
/// until the terminating `\n` arrives, so messages split across I/O
/// chunks reassemble transparently.
#[derive(Debug)]
pub struct BridgeCodec(LinesCodec);

impl BridgeCodec {
    /// Create a new `BridgeCodec` with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for BridgeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for BridgeCodec {
    type Item = String;
    type Error = AppError;

    /// Decode the next newline-terminated line from `src`.
    ///
    /// Returns `Ok(None)` when `src` contains no complete line yet
    /// (buffering). Returns `Err(AppError::Frame("line too long: …"))`
    /// when the line exceeds [`MAX_LINE_BYTES`].
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    /// Decode the final line when the stream reaches EOF.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

impl Encoder<String> for BridgeCodec {
    type Error = AppError;

    /// Encode `item` as a `\n`-terminated NDJSON line into `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] on underlying I/O failures.
    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        // LinesCodec::encode does not enforce a max line length;
        // the limit applies only to decoding.
        self.0.encode(item, dst).map_err(map_codec_error)
    }
}

// ── Private helper ────────────────────────────────────────────────────────────

/// Map a [`LinesCodecError`] to an [`AppError`].
fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Frame(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
