//! Worker mode — joins a coordinator and tracks this worker's assignments.
//!
//! The agent keeps serving its last-known assignments while the
//! coordinator is unreachable. An optional status listener exposes
//! `/healthz` and `/assignments` for local health checks.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use tokio::sync::watch;
use tracing::info;

use meridian_cluster::proto::{ApiResponse, Assignment};
use meridian_cluster::{AssignmentTable, HttpControlPlane, WorkerAgent};

use crate::config::WorkerSection;

pub async fn run_worker(section: WorkerSection) -> anyhow::Result<()> {
    info!("Meridian daemon starting in worker mode");
    let agent_config = section.to_agent_config()?;
    let control = HttpControlPlane::new(&section.coordinator).with_timeout(section.request_timeout()?);
    info!(
        worker_id = %agent_config.worker_id,
        coordinator = %control.endpoint(),
        "worker configured"
    );

    let agent = Arc::new(WorkerAgent::new(agent_config, control));

    // ── Shutdown signal ──────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let runner = Arc::clone(&agent);
    let agent_shutdown = shutdown_rx.clone();
    let agent_handle = tokio::spawn(async move {
        runner.run(agent_shutdown).await;
    });

    // ── Local status endpoint ────────────────────────────────────
    let status_handle = match &section.status_listen {
        Some(addr) => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            info!(addr = %listener.local_addr()?, "worker status listening");
            let router = status_router(agent.assignments());
            let mut status_shutdown = shutdown_rx.clone();
            Some(tokio::spawn(async move {
                let served = axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        let _ = status_shutdown.changed().await;
                    })
                    .await;
                if let Err(e) = served {
                    tracing::warn!(error = %e, "worker status server failed");
                }
            }))
        }
        None => None,
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for CTRL+C");
    }
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = agent_handle.await;
    if let Some(handle) = status_handle {
        let _ = handle.await;
    }
    info!(serving = agent.assignments().len(), "worker stopped");
    Ok(())
}

/// `/healthz` and `/assignments` over the local assignment table.
fn status_router(assignments: Arc<AssignmentTable>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { Json(ApiResponse::ok("ok")) }))
        .route("/assignments", get(list_assignments))
        .with_state(assignments)
}

async fn list_assignments(State(assignments): State<Arc<AssignmentTable>>) -> Json<ApiResponse<Vec<Assignment>>> {
    Json(ApiResponse::ok(assignments.snapshot()))
}
