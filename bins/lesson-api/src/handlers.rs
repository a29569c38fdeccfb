// HTTP route handlers for the lesson API

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use lesson_common::redis;
use lesson_common::types::{is_valid_project_id, RunRequest};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::metrics;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub run_id: String,
    pub project_id: String,
}

fn invalid_project(project_id: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({
            "error": format!("Invalid project id '{}'", project_id)
        })),
    )
        .into_response()
}

fn redis_failure(action: &str, e: &::redis::RedisError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({
            "error": format!("Failed to {}: {}", action, e)
        })),
    )
        .into_response()
}

/// POST /projects/{project_id}/run - Queue a test run for the project's current lesson
pub async fn queue_run(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> Response {
    if !is_valid_project_id(&project_id) {
        return invalid_project(&project_id);
    }

    let request = RunRequest::new(&project_id);
    let mut conn = state.redis.clone();
    match redis::push_run(&mut conn, &request).await {
        Ok(()) => {
            metrics::RUNS_QUEUED.inc();
            info!(run_id = %request.id, project_id = %project_id, "Run queued");
            (
                StatusCode::CREATED,
                Json(RunResponse {
                    run_id: request.id.to_string(),
                    project_id,
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!(run_id = %request.id, error = %e, "Failed to queue run");
            redis_failure("queue run", &e)
        }
    }
}

/// POST /projects/{project_id}/cancel - Flag the project's live run for cancellation
pub async fn cancel_run(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> Response {
    if !is_valid_project_id(&project_id) {
        return invalid_project(&project_id);
    }

    let mut conn = state.redis.clone();
    match redis::request_cancel(&mut conn, &project_id).await {
        Ok(()) => {
            metrics::CANCELLATIONS_REQUESTED.inc();
            info!(project_id = %project_id, "Cancellation requested");
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({
                    "project_id": project_id,
                    "status": "cancelling"
                })),
            )
                .into_response()
        }
        Err(e) => {
            error!(project_id = %project_id, error = %e, "Failed to request cancellation");
            redis_failure("request cancellation", &e)
        }
    }
}

/// GET /projects/{project_id}/tests - Latest test list of the project's last run
pub async fn get_tests(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> Response {
    if !is_valid_project_id(&project_id) {
        return invalid_project(&project_id);
    }

    let mut conn = state.redis.clone();
    match redis::get_tests(&mut conn, &project_id).await {
        Ok(Some(tests)) => (StatusCode::OK, Json(tests)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "project_id": project_id,
                "message": "No run recorded for this project"
            })),
        )
            .into_response(),
        Err(e) => {
            error!(project_id = %project_id, error = %e, "Failed to fetch tests");
            redis_failure("query tests", &e)
        }
    }
}

/// GET /projects/{project_id}/progress - Stored lesson progress
pub async fn get_progress(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> Response {
    if !is_valid_project_id(&project_id) {
        return invalid_project(&project_id);
    }

    let mut conn = state.redis.clone();
    match redis::get_project_config(&mut conn, &project_id).await {
        Ok(Some(config)) => (StatusCode::OK, Json(config)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "project_id": project_id,
                "message": "Project has not been started"
            })),
        )
            .into_response(),
        Err(e) => {
            error!(project_id = %project_id, error = %e, "Failed to fetch progress");
            redis_failure("query progress", &e)
        }
    }
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus text exposition
pub async fn export_metrics() -> Response {
    match metrics::render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
