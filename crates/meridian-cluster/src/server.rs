//! HTTP/JSON RPC surface of the coordinator.
//!
//! # Routes
//!
//! | Method | Path | Operation |
//! |---|---|---|
//! | POST | `/v1/workers/register` | Register |
//! | POST | `/v1/workers/{id}/heartbeat` | Heartbeat |
//! | GET | `/v1/workers/{id}/assignments` | ListAssignments |
//! | GET | `/v1/workers` | ListWorkers |
//! | GET | `/v1/partitions` | PartitionTable |
//! | POST | `/v1/resources` | CreateResource |
//! | GET/PUT/DELETE | `/v1/resources/{name}` | Get/Update/Delete |
//! | GET/POST | `/v1/capabilities` | List/PublishCapability |
//! | POST | `/v1/capabilities/match` | FindCapableWorkers |
//! | GET | `/healthz` | liveness |

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use meridian_capability::CapabilityDocument;
use serde::Serialize;
use tracing::warn;

use crate::coordinator::Coordinator;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::proto::*;

/// Shared state for RPC handlers.
#[derive(Clone)]
pub struct ServerState {
    pub coordinator: Arc<Coordinator>,
}

/// Build the coordinator router.
pub fn build_router(coordinator: Arc<Coordinator>) -> Router {
    let state = ServerState { coordinator };

    let api_routes = Router::new()
        .route("/workers", get(list_workers))
        .route("/workers/register", post(register))
        .route("/workers/{id}/heartbeat", post(heartbeat))
        .route("/workers/{id}/assignments", get(list_assignments))
        .route("/partitions", get(partition_table))
        .route("/resources", post(create_resource))
        .route(
            "/resources/{name}",
            get(get_resource).put(update_resource).delete(delete_resource),
        )
        .route("/capabilities", get(list_capabilities).post(publish_capability))
        .route("/capabilities/match", post(find_capable_workers))
        .with_state(state);

    Router::new()
        .nest("/v1", api_routes)
        .route("/healthz", get(healthz))
}

fn status_for(err: &CoordinatorError) -> StatusCode {
    match err {
        CoordinatorError::InvalidCapability { .. } | CoordinatorError::InvalidName { .. } => {
            StatusCode::BAD_REQUEST
        }
        CoordinatorError::UnknownWorker { .. } | CoordinatorError::NotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        CoordinatorError::AlreadyExists { .. } | CoordinatorError::ImmutableVersion { .. } => {
            StatusCode::CONFLICT
        }
        CoordinatorError::NoCapableWorker { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        CoordinatorError::RingExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
        CoordinatorError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &CoordinatorError) -> Response {
    let status = status_for(err);
    if status.is_server_error() {
        warn!(error = %err, "request failed");
    }
    (status, Json(ApiResponse::<()>::err(ApiError::from(err)))).into_response()
}

fn respond<T: Serialize>(result: CoordinatorResult<T>, status: StatusCode) -> Response {
    match result {
        Ok(data) => (status, Json(ApiResponse::ok(data))).into_response(),
        Err(e) => error_response(&e),
    }
}

// ── Workers ────────────────────────────────────────────────────────

/// POST /v1/workers/register
async fn register(State(state): State<ServerState>, Json(req): Json<RegisterRequest>) -> Response {
    respond(state.coordinator.register(req), StatusCode::OK)
}

/// POST /v1/workers/{id}/heartbeat
async fn heartbeat(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(req): Json<HeartbeatRequest>,
) -> Response {
    respond(state.coordinator.heartbeat(&id, req), StatusCode::OK)
}

/// GET /v1/workers/{id}/assignments
async fn list_assignments(State(state): State<ServerState>, Path(id): Path<String>) -> Response {
    respond(state.coordinator.list_assignments(&id), StatusCode::OK)
}

/// GET /v1/workers
async fn list_workers(State(state): State<ServerState>) -> Response {
    respond(Ok(state.coordinator.list_workers()), StatusCode::OK)
}

/// GET /v1/partitions
async fn partition_table(State(state): State<ServerState>) -> Response {
    respond(Ok(state.coordinator.partition_table()), StatusCode::OK)
}

// ── Resources ──────────────────────────────────────────────────────

/// POST /v1/resources
///
/// 201 when assigned, 202 when stored without an owner.
async fn create_resource(
    State(state): State<ServerState>,
    Json(req): Json<CreateResourceRequest>,
) -> Response {
    match state.coordinator.create_resource(req) {
        Ok(ack) if ack.pending => respond(Ok(ack), StatusCode::ACCEPTED),
        result => respond(result, StatusCode::CREATED),
    }
}

/// GET /v1/resources/{name}
async fn get_resource(State(state): State<ServerState>, Path(name): Path<String>) -> Response {
    respond(state.coordinator.get_resource(&name), StatusCode::OK)
}

/// PUT /v1/resources/{name}
async fn update_resource(
    State(state): State<ServerState>,
    Path(name): Path<String>,
    Json(req): Json<UpdateResourceRequest>,
) -> Response {
    respond(state.coordinator.update_resource(&name, req), StatusCode::OK)
}

/// DELETE /v1/resources/{name}
async fn delete_resource(State(state): State<ServerState>, Path(name): Path<String>) -> Response {
    respond(state.coordinator.delete_resource(&name), StatusCode::OK)
}

// ── Capabilities ───────────────────────────────────────────────────

async fn list_capabilities(State(state): State<ServerState>) -> Response {
    respond(Ok(state.coordinator.list_capabilities()), StatusCode::OK)
}

async fn publish_capability(
    State(state): State<ServerState>,
    Json(doc): Json<CapabilityDocument>,
) -> Response {
    respond(state.coordinator.publish_capability(doc), StatusCode::CREATED)
}

/// POST /v1/capabilities/match
async fn find_capable_workers(
    State(state): State<ServerState>,
    Json(req): Json<FindCapableRequest>,
) -> Response {
    respond(state.coordinator.find_capable_workers(req), StatusCode::OK)
}

async fn healthz() -> impl IntoResponse {
    Json(ApiResponse::ok("ok"))
}
