//! Router-level tests: envelope shape, status codes, and the worker-facing
//! poll loop over the in-memory store.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use watch_control::storage::{ControlStore, MemStore};
use watch_control::{ControlConfig, ControlServer, ServerConfig};

fn create_test_router() -> Router {
    let store: Arc<dyn ControlStore> = Arc::new(MemStore::new());
    let server = ControlServer::new(ServerConfig::default(), store, &ControlConfig::default())
        .expect("server config is valid");
    server.router()
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn heartbeat(router: &Router, worker_id: &str) {
    let (status, body) = send(
        router,
        post_json("/api/heartbeat", json!({ "worker_id": worker_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"]["status"], "success");
}

#[tokio::test]
async fn test_heartbeat_then_worker_listing() {
    let router = create_test_router();
    heartbeat(&router, "w1").await;

    let (status, body) = send(&router, get("/api/workers")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["page"], 1);
    assert_eq!(body["data"]["total_pages"], 1);
    assert_eq!(body["data"]["items"][0]["worker_id"], "w1");
    assert_eq!(body["data"]["items"][0]["status"], "online");
    assert_eq!(body["data"]["items"][0]["task_status"], "idle");
}

#[tokio::test]
async fn test_get_worker_not_found_maps_to_404() {
    let router = create_test_router();
    let (status, body) = send(&router, get("/api/workers/ghost")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 1);
    assert!(body["msg"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn test_invalid_pagination_maps_to_400() {
    let router = create_test_router();
    let (status, body) = send(&router, get("/api/workers?page=0&page_size=10")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 1);
}

#[tokio::test]
async fn test_create_job_without_capacity_maps_to_409() {
    let router = create_test_router();
    heartbeat(&router, "w1").await;

    let (status, body) = send(
        &router,
        post_json(
            "/api/jobs",
            json!({ "room_id": "room-1", "total_watch_time": 60, "worker_count": 3 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], 1);
    let msg = body["msg"].as_str().unwrap();
    assert!(msg.contains("required 3"));
    assert!(msg.contains("available 1"));
}

#[tokio::test]
async fn test_full_assignment_flow_over_http() {
    let router = create_test_router();
    heartbeat(&router, "w1").await;
    heartbeat(&router, "w2").await;

    let (status, body) = send(
        &router,
        post_json(
            "/api/jobs",
            json!({ "room_id": "room-1", "total_watch_time": 100, "worker_count": 2 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["sub_job_count"], 2);
    assert_eq!(body["data"]["quota"], 50);

    // The worker poll returns its slice plus the session blob.
    let (status, body) = send(&router, get("/api/jobs/worker/w1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["room_id"], "room-1");
    assert_eq!(body["data"]["quota"], 50);
    assert_eq!(body["data"]["status"], "running");
    assert!(body["data"]["session"].is_object());
    let sub_job_id = body["data"]["sub_job_id"].as_i64().unwrap();

    // Report the full quota; the sub-job completes.
    let (status, body) = send(
        &router,
        post_json(
            "/api/jobs/progress",
            json!({ "sub_job_id": sub_job_id, "watched_time": 50 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "success");

    // The finished worker is back to polling "no task".
    let (status, body) = send(&router, get("/api/jobs/worker/w1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 0);
    assert!(body["data"].is_null());

    // The job listing shows the aggregate state.
    let (status, body) = send(&router, get("/api/jobs")).await;
    assert_eq!(status, StatusCode::OK);
    let job = &body["data"]["items"][0];
    assert_eq!(job["status"], "running");
    assert_eq!(job["watched_time"], 50);
    assert_eq!(job["progress"], 50.0);
    assert_eq!(job["sub_jobs"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_idle_worker_polls_null_task() {
    let router = create_test_router();
    heartbeat(&router, "w1").await;

    let (status, body) = send(&router, get("/api/jobs/worker/w1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 0);
    assert!(body["data"].is_null());
}

#[tokio::test]
async fn test_error_report_over_http() {
    let router = create_test_router();
    heartbeat(&router, "w1").await;

    send(
        &router,
        post_json(
            "/api/jobs",
            json!({ "room_id": "room-1", "total_watch_time": 60, "worker_count": 1 }),
        ),
    )
    .await;
    let (_, body) = send(&router, get("/api/jobs/worker/w1")).await;
    let sub_job_id = body["data"]["sub_job_id"].as_i64().unwrap();

    let (status, body) = send(
        &router,
        post_json(
            "/api/jobs/error",
            json!({
                "sub_job_id": sub_job_id,
                "error_message": "stream player crashed",
                "evidence_ref": "screenshots/w1.png"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "success");

    let (_, body) = send(&router, get("/api/jobs")).await;
    let sub = &body["data"]["items"][0]["sub_jobs"][0];
    assert_eq!(sub["status"], "failed");
    assert_eq!(sub["evidence_ref"], "screenshots/w1.png");
}

#[tokio::test]
async fn test_progress_on_unknown_sub_job_maps_to_404() {
    let router = create_test_router();
    let (status, body) = send(
        &router,
        post_json(
            "/api/jobs/progress",
            json!({ "sub_job_id": 12345, "watched_time": 10 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 1);
}

#[tokio::test]
async fn test_jobs_listing_rejects_unknown_status_filter() {
    let router = create_test_router();
    let (status, body) = send(&router, get("/api/jobs?status=cancelled")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 1);
}

#[tokio::test]
async fn test_purge_offline_endpoint() {
    let router = create_test_router();
    heartbeat(&router, "w1").await;

    // Everyone is fresh, so nothing is deleted.
    let (status, body) = send(&router, delete("/api/workers/offline")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["deleted_count"], 0);
}

#[tokio::test]
async fn test_menu_payload() {
    let router = create_test_router();
    let (status, body) = send(&router, get("/api/menu")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"]["list"][0]["name"], "workers");
}
