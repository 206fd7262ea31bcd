//! Route configuration.

use crate::handlers;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check (intentionally unauthenticated for probes)
        .route("/v1/health", get(handlers::health_check))
        // Upload protocol
        .route("/v1/files", post(handlers::upload_file))
        .route("/v1/files/{checksum}", get(handlers::file_status))
        .route(
            "/v1/files/{checksum}/session",
            delete(handlers::discard_session),
        )
        // Reference changes from the front layer
        .route("/v1/references", post(handlers::change_reference))
        // Upload sizes are bounded by declared-size validation, not by the
        // framework default.
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
