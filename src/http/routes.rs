use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Session control
        .route("/consult/start", post(handlers::start_consult))
        .route("/consult/stop", post(handlers::stop_consult))
        // Session queries
        .route("/consult/status", get(handlers::consult_status))
        .route("/consult/transcript", get(handlers::consult_transcript))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
