//! Bridge configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{AppError, Result};

/// Backoff curve applied between consecutive respawn attempts.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackoffCurve {
    /// Constant delay between attempts.
    Fixed,
    /// Delay doubles per consecutive failure, capped at 30 seconds.
    Exponential,
}

/// Respawn and subprocess-lifecycle settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RespawnConfig {
    /// Maximum consecutive failed spawn attempts before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay between respawn attempts, in milliseconds.
    #[serde(default = "default_respawn_delay_ms")]
    pub delay_ms: u64,
    /// Backoff curve for consecutive failures.
    #[serde(default = "default_backoff")]
    pub backoff: BackoffCurve,
    /// Deadline for the agent's `init` message after spawn, in milliseconds.
    #[serde(default = "default_init_deadline_ms")]
    pub init_deadline_ms: u64,
    /// Grace period between the termination signal and a force kill.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_respawn_delay_ms() -> u64 {
    3000
}

fn default_backoff() -> BackoffCurve {
    BackoffCurve::Fixed
}

fn default_init_deadline_ms() -> u64 {
    10_000
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}

impl Default for RespawnConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_respawn_delay_ms(),
            backoff: default_backoff(),
            init_deadline_ms: default_init_deadline_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

/// Per-client delivery settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ClientConfig {
    /// Outbound frame buffer per connection; a full buffer disconnects the client.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    /// Per-frame socket send timeout, in milliseconds.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

fn default_outbound_buffer() -> usize {
    64
}

fn default_send_timeout_ms() -> u64 {
    5000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: default_outbound_buffer(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

fn default_host_cli() -> String {
    "claude".into()
}

fn default_host_cli_args() -> Vec<String> {
    [
        "--print",
        "--input-format",
        "stream-json",
        "--output-format",
        "stream-json",
        "--verbose",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_http_port() -> u16 {
    3100
}

/// Bridge configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    /// Host CLI binary spawned as the agent subprocess (e.g., `claude`).
    #[serde(default = "default_host_cli")]
    pub host_cli: String,
    /// Arguments for the host CLI; defaults select bidirectional stream-JSON.
    #[serde(default = "default_host_cli_args")]
    pub host_cli_args: Vec<String>,
    /// Working directory for the subprocess; current directory when unset.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
    /// HTTP port for the WebSocket and status endpoints.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Respawn policy.
    #[serde(default)]
    pub respawn: RespawnConfig,
    /// Client delivery settings.
    #[serde(default)]
    pub client: ClientConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host_cli: default_host_cli(),
            host_cli_args: default_host_cli_args(),
            workspace_root: None,
            http_port: default_http_port(),
            respawn: RespawnConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<()> {
        if self.host_cli.trim().is_empty() {
            return Err(AppError::Config("host_cli must not be empty".into()));
        }

        if self.respawn.init_deadline_ms == 0 {
            return Err(AppError::Config(
                "respawn.init_deadline_ms must be greater than zero".into(),
            ));
        }

        if self.client.outbound_buffer == 0 {
            return Err(AppError::Config(
                "client.outbound_buffer must be greater than zero".into(),
            ));
        }

        if let Some(root) = &self.workspace_root {
            let canonical_root = root
                .canonicalize()
                .map_err(|err| AppError::Config(format!("workspace_root invalid: {err}")))?;
            self.workspace_root = Some(canonical_root);
        }

        Ok(())
    }
}
