//! Airwave Server - headless shared-radio broadcast daemon.
//!
//! Runs the broadcast engine and HTTP API as a standalone process:
//! listeners attach to `/stream`, approved users feed the queue through
//! `/api/queue`, and the authenticating reverse proxy in front supplies
//! the identity headers.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;

use airwave_core::{start_server, AppState};

use crate::config::ServerConfig;

/// Airwave Server - single-channel shared radio over HTTP.
#[derive(Parser, Debug)]
#[command(name = "airwave-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "AIRWAVE_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "AIRWAVE_BIND_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Airwave Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.bind_port = port;
    }

    let core_config = config.to_core_config();
    core_config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid configuration")?;

    log::info!(
        "Configuration: bind_port={}, soundcloud={}, external_fetcher={}",
        config.bind_port,
        if core_config.soundcloud_enabled() {
            "enabled"
        } else {
            "disabled"
        },
        if core_config.disable_external_fetcher {
            "disabled"
        } else if core_config.external_fetcher_first {
            "primary"
        } else {
            "fallback"
        },
    );

    let state = AppState::new(core_config);
    state.start_background_tasks();

    let engine = state.engine.clone();
    let bind_port = config.bind_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(state, bind_port).await {
            log::error!("Server error: {e}");
        }
    });

    shutdown_signal().await;
    log::info!("Shutdown signal received, cleaning up...");

    // Kill the encoder and drop every listener before exiting.
    engine.shutdown();
    server_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
