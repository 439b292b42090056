//! Health check handlers

use axum::{extract::State, http::StatusCode, Json};
use mailcatch_storage::FileStorage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::AppState;

/// Basic health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall health status
    pub status: String,
}

/// Basic health check
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

/// Liveness check (is the process running)
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness check: the mail root must be reachable
pub async fn readiness<S: FileStorage + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> StatusCode {
    if state.reader.is_ready().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
