//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Line framing or message decode failure on the agent stream.
    Frame(String),
    /// Agent subprocess spawn, stdio, or protocol failure.
    Agent(String),
    /// Submission rejected because the agent is not running.
    Unavailable(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Frame(msg) => write!(f, "frame: {msg}"),
            Self::Agent(msg) => write!(f, "agent: {msg}"),
            Self::Unavailable(msg) => write!(f, "agent unavailable: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

// Required by the stream codec traits, which convert transport failures
// through `From<io::Error>`.
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
