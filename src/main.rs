//! # CoreBGP updater
//!
//! Runs next to a GoBGP daemon and keeps the routes it originates in line
//! with the announcements in the CoreBGP store.
//!
//! ## Startup
//!
//! 1. **Configuration** - defaults, then `--config`, then flags
//! 2. **Logging** - `RUST_LOG` or the `-v` count, to `--log-path` or stderr (`-`)
//! 3. **Adapters** - HTTP/WebSocket store client and the gobgp CLI speaker
//! 4. **Controller** - speaker health check, initial resync, then watch and reconcile
//! 5. **Status** - sync, degraded routes and convergence are logged as they change
//!
//! ## Shutdown
//!
//! SIGINT or SIGTERM stops the watch session; the engine drains its queue,
//! runs one final cycle and the process exits. A speaker or store that
//! never answers inside the startup window exits non-zero.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use corebgp::logging::init_tracing;
use corebgp::report::report_status;
use corebgp::{Cli, UpdaterConfig};
use corebgp_client::ApiClient;
use corebgp_reconciler::{shutdown, Controller, ShutdownSignal, ShutdownTrigger};
use corebgp_speaker::GobgpCli;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = UpdaterConfig::load(&cli).context("Failed to load configuration")?;
    init_tracing(config.verbose, &config.log_path)?;

    info!(
        api = %config.api_endpoint,
        gobgp = %config.gobgp_endpoint,
        version = env!("CARGO_PKG_VERSION"),
        "CoreBGP updater starting"
    );

    let result = run(config).await;
    if let Err(ref e) = result {
        error!(error = %format!("{e:#}"), "CoreBGP updater failed");
    }
    result
}

async fn run(config: UpdaterConfig) -> Result<()> {
    let store = ApiClient::with_config(config.client_config())
        .context("Failed to build API client")?;
    let speaker = GobgpCli::with_config(config.speaker_config())
        .context("Failed to build GoBGP adapter")?;

    let controller = Controller::new(Arc::new(store), Arc::new(speaker), config.controller)
        .context("Invalid controller configuration")?;

    tokio::spawn(report_status(controller.subscribe()));

    let (trigger, shutdown) = shutdown::channel();
    tokio::spawn(forward_signals(trigger));

    let status = controller
        .run(shutdown)
        .await
        .context("Controller stopped")?;

    info!(
        revision = %status.revision,
        advertised = status.advertised,
        pending = status.pending,
        withdrawing = status.withdrawing,
        degraded = status.degraded.len(),
        "CoreBGP updater stopped"
    );
    Ok(())
}

/// Turn the first SIGINT or SIGTERM into a shutdown.
async fn forward_signals(trigger: ShutdownTrigger) {
    let signal = wait_for_signal().await;
    info!(%signal, "Received signal, shutting down");
    trigger.trigger(signal);
}

#[cfg(unix)]
async fn wait_for_signal() -> ShutdownSignal {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Failed to listen for SIGTERM");
            return wait_for_ctrl_c().await;
        }
    };

    tokio::select! {
        _ = terminate.recv() => ShutdownSignal::Sigterm,
        signal = wait_for_ctrl_c() => signal,
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> ShutdownSignal {
    wait_for_ctrl_c().await
}

async fn wait_for_ctrl_c() -> ShutdownSignal {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    ShutdownSignal::Sigint
}
