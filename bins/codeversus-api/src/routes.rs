// Route table for the CodeVersus API

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/submissions", post(handlers::submit))
        .route("/submissions/:id", get(handlers::get_submission))
        .route("/submissions/:id/cancel", post(handlers::cancel_submission))
        .route("/problems", get(handlers::list_problems))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::export_metrics))
}
