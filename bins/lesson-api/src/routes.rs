// Route table for the lesson API

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/projects/:project_id/run", post(handlers::queue_run))
        .route("/projects/:project_id/cancel", post(handlers::cancel_run))
        .route("/projects/:project_id/tests", get(handlers::get_tests))
        .route("/projects/:project_id/progress", get(handlers::get_progress))
        .route("/status", get(handlers::health_check))
        .route("/metrics", get(handlers::export_metrics))
}
