//! API routes

use axum::{middleware, routing::get, Router};
use mailcatch_storage::FileStorage;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::{auth_middleware, AppState};
use crate::handlers::{health, mail};

/// Create the API router
pub fn create_router<S: FileStorage + 'static>(state: AppState<S>) -> Router {
    let state = Arc::new(state);

    // Health check routes (no auth required)
    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/live", get(health::liveness))
        .route("/ready", get(health::readiness::<S>))
        .with_state(state.clone());

    // Mail routes
    let mail_routes = Router::new()
        .route("/", get(mail::current_week::<S>))
        .route("/:year/:week", get(mail::list_week::<S>))
        .route("/:domain/:username/:filename", get(mail::get_message::<S>))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware::<S>,
        ))
        .with_state(state);

    Router::new()
        .nest("/health", health_routes)
        .nest("/mail", mail_routes)
        .layer(TraceLayer::new_for_http())
}
