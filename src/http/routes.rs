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
        // Live connection
        .route("/connection/status", get(handlers::connection_status))
        // Analyses
        .route("/analyses", post(handlers::create_analysis))
        .route(
            "/analyses/:analysis_id",
            get(handlers::get_analysis).delete(handlers::cancel_analysis),
        )
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
