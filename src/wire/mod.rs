//! Agent stream handling.
//!
//! This module manages bidirectional NDJSON stream communication with
//! the agent subprocess. Each live process owns a pair of read/write
//! tasks communicating with the agent's stdio.
//!
//! - [`codec`]: [`LinesCodec`](tokio_util::codec::LinesCodec)-based stream framing for NDJSON messages.
//! - [`message`]: tagged wire message model, parsing, and envelope encoding.
//! - [`reader`]: async read task that parses incoming agent messages.
//! - [`writer`]: async write task that serializes outbound envelopes to the agent.

pub mod codec;
pub mod message;
pub mod reader;
pub mod writer;
