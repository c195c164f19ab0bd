//! HTTP surface for the coordinator.
//!
//! Every response carries the `{code, data}` / `{code, msg}` envelope the
//! dashboard and the worker agents expect: `code` 0 with a `data` payload
//! on success, `code` 1 with a human-readable `msg` on failure. The HTTP
//! status distinguishes the failure class for callers that want it.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Json, Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::assignment::AssignmentEngine;
use crate::error::ControlError;
use crate::model::JobStatus;
use crate::progress::ProgressAggregator;
use crate::registry::WorkerRegistry;

/// Shared handler state: the three engines over one store.
pub struct AppState {
    pub registry: WorkerRegistry,
    pub assignment: AssignmentEngine,
    pub progress: ProgressAggregator,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/heartbeat", post(heartbeat))
        .route("/api/workers", get(list_workers))
        .route("/api/workers/offline", delete(purge_offline))
        .route("/api/workers/:worker_id", get(get_worker))
        .route("/api/menu", get(menu))
        .route("/api/jobs", post(create_job).get(list_jobs))
        .route("/api/jobs/worker/:worker_id", get(fetch_task))
        .route("/api/jobs/progress", post(report_progress))
        .route("/api/jobs/error", post(report_error))
        .with_state(state)
}

// ==================== Envelope ====================

type ApiResponse = (StatusCode, Json<Value>);

fn ok(data: Value) -> ApiResponse {
    (StatusCode::OK, Json(json!({ "code": 0, "data": data })))
}

fn fail(err: &ControlError) -> ApiResponse {
    let status = match err {
        ControlError::NotFound(_) => StatusCode::NOT_FOUND,
        ControlError::InsufficientCapacity { .. } => StatusCode::CONFLICT,
        ControlError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        ControlError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "code": 1, "msg": err.to_string() })))
}

// ==================== Request Types ====================

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: String,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub room_id: String,
    pub total_watch_time: i32,
    pub worker_count: i32,
}

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub sub_job_id: i64,
    pub watched_time: i32,
}

#[derive(Debug, Deserialize)]
pub struct ErrorRequest {
    pub sub_job_id: i64,
    pub error_message: Option<String>,
    pub evidence_ref: Option<String>,
}

// ==================== Handlers ====================

async fn heartbeat(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    Json(req): Json<HeartbeatRequest>,
) -> ApiResponse {
    let origin = peer
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default();

    match state.registry.record_heartbeat(&req.worker_id, &origin).await {
        Ok(()) => ok(json!({ "status": "success" })),
        Err(e) => fail(&e),
    }
}

async fn list_workers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> ApiResponse {
    let page = query.page.unwrap_or(1);
    let page_size = query.page_size.unwrap_or(10);

    match state.registry.list_workers(page, page_size).await {
        Ok(page) => ok(json!(page)),
        Err(e) => fail(&e),
    }
}

async fn get_worker(
    State(state): State<Arc<AppState>>,
    Path(worker_id): Path<String>,
) -> ApiResponse {
    match state.registry.get_worker(&worker_id).await {
        Ok(worker) => ok(json!(worker)),
        Err(e) => fail(&e),
    }
}

async fn purge_offline(State(state): State<Arc<AppState>>) -> ApiResponse {
    match state.registry.purge_offline().await {
        Ok(deleted) => ok(json!({ "deleted_count": deleted })),
        Err(e) => fail(&e),
    }
}

async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateJobRequest>,
) -> ApiResponse {
    match state
        .assignment
        .create_job(&req.room_id, req.total_watch_time, req.worker_count)
        .await
    {
        Ok(new_job) => ok(json!({
            "job_id": new_job.job_id,
            "sub_job_count": new_job.sub_job_count,
            "quota": new_job.quota,
        })),
        Err(e) => fail(&e),
    }
}

async fn fetch_task(
    State(state): State<Arc<AppState>>,
    Path(worker_id): Path<String>,
) -> ApiResponse {
    match state.assignment.fetch_task(&worker_id).await {
        // "No task right now" is a success with a null payload, never an
        // error: idle workers poll this endpoint continuously.
        Ok(None) => ok(Value::Null),
        Ok(Some(assignment)) => ok(json!(assignment)),
        Err(e) => fail(&e),
    }
}

async fn report_progress(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ProgressRequest>,
) -> ApiResponse {
    match state
        .progress
        .report_progress(req.sub_job_id, req.watched_time)
        .await
    {
        Ok(_) => ok(json!({ "status": "success" })),
        Err(e) => fail(&e),
    }
}

async fn report_error(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ErrorRequest>,
) -> ApiResponse {
    if let Some(message) = &req.error_message {
        warn!(sub_job_id = req.sub_job_id, %message, "worker reported an error");
    }

    match state
        .progress
        .report_error(req.sub_job_id, req.evidence_ref.as_deref())
        .await
    {
        Ok(()) => ok(json!({ "status": "success" })),
        Err(e) => fail(&e),
    }
}

async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<JobsQuery>,
) -> ApiResponse {
    let page = query.page.unwrap_or(1);
    let page_size = query.page_size.unwrap_or(10);

    let status = match query.status.as_deref() {
        Some(raw) => match raw.parse::<JobStatus>() {
            Ok(status) => Some(status),
            Err(msg) => return fail(&ControlError::InvalidArgument(msg)),
        },
        None => None,
    };

    match state.progress.list_jobs(page, page_size, status).await {
        Ok(page) => ok(json!(page)),
        Err(e) => fail(&e),
    }
}

/// Static navigation payload for the dashboard shell.
async fn menu() -> ApiResponse {
    ok(json!({
        "list": [
            {
                "path": "/workers",
                "name": "workers",
                "component": "LAYOUT",
                "redirect": "/workers",
                "meta": { "title": "Worker Management", "icon": "user" },
                "children": [
                    {
                        "path": "list",
                        "name": "WorkerList",
                        "component": "/workers/index",
                        "meta": { "title": "Worker List" }
                    },
                    {
                        "path": "monitor",
                        "name": "WorkerMonitor",
                        "component": "/workers/monitor/index",
                        "meta": { "title": "Worker Monitor" }
                    }
                ]
            }
        ]
    }))
}
