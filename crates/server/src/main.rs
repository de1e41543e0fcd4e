// crates/server/src/main.rs
//! Reel server binary.
//!
//! Installs logging and metrics, wires the job manager to the event broker,
//! then serves the API until Ctrl-C or SIGTERM.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use reel_jobs::JobManager;
use reel_observability::{init_tracing, LogHub, DEFAULT_FLUSH_INTERVAL};
use reel_server::{create_app, init_metrics, AppState, ServerConfig};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}

/// Wait until every job that was still live at shutdown has settled.
async fn drain_jobs(jobs: &JobManager) {
    for job in jobs.get_queue() {
        if !job.is_terminal() {
            jobs.wait(job.id).await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::parse();

    let logs = LogHub::new();
    init_tracing(&config.log_config(), &logs)?;
    init_metrics();

    let background = CancellationToken::new();
    let flusher = logs.spawn_flusher(DEFAULT_FLUSH_INTERVAL, background.clone());

    let state = AppState::new(config.manager_config(), config.sse_buffer(), logs);
    state.start_events();
    let app = create_app(state.clone());

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, version = env!("CARGO_PKG_VERSION"), "reel server listening");

    // SSE streams only end once the broker disconnects them, so stop it as
    // soon as the signal arrives rather than after the server drains.
    let shutdown_state = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_state.shutdown();
        })
        .await
        .context("server error")?;

    let timeout = config.shutdown_timeout();
    if tokio::time::timeout(timeout, drain_jobs(&state.jobs)).await.is_err() {
        tracing::warn!(
            timeout_secs = timeout.as_secs(),
            "Jobs still running at shutdown timeout"
        );
    }

    background.cancel();
    if tokio::time::timeout(Duration::from_secs(1), flusher).await.is_err() {
        tracing::warn!("Log flusher did not stop in time");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
