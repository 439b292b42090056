//! Captured mail handlers

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use mailcatch_storage::FileStorage;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::auth::AppState;
use crate::reader::SummaryView;

/// Redirect to the listing of the current ISO week
pub async fn current_week<S: FileStorage + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> impl IntoResponse {
    let (year, week) = state.reader.current_bucket_redirect_target();
    (
        StatusCode::FOUND,
        [(header::LOCATION, format!("/mail/{}/{}", year, week))],
    )
}

/// List the summaries of one week, newest first
pub async fn list_week<S: FileStorage + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((year, week)): Path<(i32, u32)>,
) -> Json<Vec<SummaryView>> {
    Json(state.reader.list_bucket(year, week).await)
}

/// Fetch one decoded message artifact
pub async fn get_message<S: FileStorage + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((domain, username, filename)): Path<(String, String, String)>,
) -> Result<Json<Value>, StatusCode> {
    state
        .reader
        .fetch_message(&domain, &username, &filename)
        .await
        .map(Json)
        .map_err(|e| {
            debug!("Message lookup failed: {}", e);
            StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::NOT_FOUND)
        })
}
