#![forbid(unsafe_code)]

//! `agent-bridge` — conversational agent subprocess bridge binary.
//!
//! Bootstraps configuration, starts the supervisor that owns the agent
//! CLI subprocess, and serves the WebSocket/status gateway for clients.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use agent_bridge::config::BridgeConfig;
use agent_bridge::gateway::{self, Gateway};
use agent_bridge::hub::ClientHub;
use agent_bridge::models::session::SessionView;
use agent_bridge::status::StatusReporter;
use agent_bridge::supervisor::{Supervisor, SupervisorState};
use agent_bridge::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-bridge", about = "Conversational agent subprocess bridge", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file; built-in defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the configured HTTP port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the subprocess working directory.
    #[arg(long)]
    workspace: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-bridge bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match args.config {
        Some(path) => BridgeConfig::load_from_path(&path)?,
        None => BridgeConfig::default(),
    };
    if let Some(port) = args.port {
        config.http_port = port;
    }
    if let Some(ws) = args.workspace {
        let canonical = ws
            .canonicalize()
            .map_err(|err| AppError::Config(format!("invalid workspace override: {err}")))?;
        config.workspace_root = Some(canonical);
    }
    info!(host_cli = %config.host_cli, port = config.http_port, "configuration loaded");

    // ── Shared state channels ───────────────────────────
    let ct = CancellationToken::new();
    let (state_tx, state_rx) = watch::channel(SupervisorState::Stopped);
    let (view_tx, view_rx) = watch::channel(SessionView::default());
    let (command_tx, command_rx) = mpsc::channel(8);

    let hub = Arc::new(ClientHub::new(
        config.client.clone(),
        state_rx.clone(),
        view_rx.clone(),
    ));

    // ── Start the supervisor ────────────────────────────
    let supervisor = Supervisor::new(
        &config,
        Arc::clone(&hub),
        state_tx,
        view_tx,
        command_rx,
        ct.clone(),
    );
    let supervisor_handle = tokio::spawn(supervisor.run());
    info!("supervisor started");

    // ── Start the gateway ───────────────────────────────
    let reporter = StatusReporter::new(state_rx, view_rx, Arc::clone(&hub));
    let gateway_state = Arc::new(Gateway::new(
        Arc::clone(&hub),
        reporter,
        command_tx,
        &config.client,
    ));
    let http_port = config.http_port;
    let gateway_ct = ct.clone();
    let gateway_handle = tokio::spawn(async move {
        if let Err(err) = gateway::serve(gateway_state, http_port, gateway_ct).await {
            error!(%err, "gateway failed");
        }
    });

    info!("agent-bridge ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    // Notify clients and drop their channels so connection handlers end,
    // then wait for the supervisor to terminate the subprocess and for
    // the gateway to drain its connections.
    hub.shutdown().await;
    let _ = tokio::join!(supervisor_handle, gateway_handle);
    info!("agent-bridge shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
