//! HTTP probes and queue inspection for worker processes.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::job::JobId;
use crate::metrics;
use crate::store::JobStore;

#[derive(Clone)]
pub struct HealthState {
    /// Pinged by readiness, read by the queue endpoints.
    pub store: Arc<dyn JobStore>,
    pub app_name: String,
    pub app_version: String,
}

impl HealthState {
    pub fn new(
        store: Arc<dyn JobStore>,
        app_name: impl Into<String>,
        app_version: impl Into<String>,
    ) -> Self {
        Self {
            store,
            app_name: app_name.into(),
            app_version: app_version.into(),
        }
    }
}

/// Liveness body. `status` is always `"healthy"`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub name: String,
    pub version: String,
}

pub async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        name: state.app_name,
        version: state.app_version,
    })
}

/// 200 while the job store answers a ping, 503 otherwise.
pub async fn ready_handler(State(state): State<HealthState>) -> (StatusCode, Json<Value>) {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "checks": { state.store.name(): "ok" }
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "checks": { state.store.name(): format!("error: {}", e) }
            })),
        ),
    }
}

/// Per-state job counts of one queue.
///
/// `GET /queues/{queue}/counts`
pub async fn counts_handler(
    State(state): State<HealthState>,
    Path(queue): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.store.counts(&queue).await {
        Ok(counts) => Ok(Json(json!({ "queue": queue, "counts": counts }))),
        Err(e) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.to_string() })),
        )),
    }
}

/// A single job record.
///
/// `GET /queues/{queue}/jobs/{id}`
pub async fn job_handler(
    State(state): State<HealthState>,
    Path((queue, id)): Path<(String, u64)>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.store.get(&queue, JobId(id)).await {
        Ok(Some(job)) => Ok(Json(json!(job))),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Job not found", "queue": queue, "id": id })),
        )),
        Err(e) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.to_string() })),
        )),
    }
}

/// Prometheus text exposition.
pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::render_metrics() {
        Some(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            output,
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "metrics recorder not installed".to_string(),
        ),
    }
}

/// Liveness (`/health`, `/healthz`), readiness (`/ready`, `/readyz`),
/// `/metrics`, and read-only queue views under `/queues/{queue}`.
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .route("/queues/{queue}/counts", get(counts_handler))
        .route("/queues/{queue}/jobs/{id}", get(job_handler))
        .with_state(state)
}
