//! Coordinator mode — owns the cluster's state and serves the `/v1` API.
//!
//! 1. Opens the redb state store under `data_dir`
//! 2. Restores capability documents and reloads workers as stale
//! 3. Starts the liveness sweeper
//! 4. Serves the HTTP API until CTRL+C

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use meridian_cluster::{Coordinator, build_router};
use meridian_state::StateStore;

use crate::config::CoordinatorSection;

pub async fn run_coordinator(section: CoordinatorSection) -> anyhow::Result<()> {
    info!("Meridian daemon starting in coordinator mode");
    let config = section.to_config()?;

    std::fs::create_dir_all(&section.data_dir)?;
    let db_path = section.data_dir.join("meridian.redb");
    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let coordinator = Arc::new(Coordinator::new(state, config)?);

    // ── Shutdown signal ──────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Liveness sweeper ─────────────────────────────────────────
    let sweeper = Arc::clone(&coordinator);
    let sweeper_handle = tokio::spawn(async move {
        sweeper.run_sweeper(shutdown_rx).await;
    });

    // ── HTTP API ─────────────────────────────────────────────────
    let router = build_router(coordinator);
    let listener = tokio::net::TcpListener::bind(&section.listen).await?;
    info!(addr = %listener.local_addr()?, "coordinator API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for CTRL+C");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = sweeper_handle.await;
    info!("coordinator stopped");
    Ok(())
}
