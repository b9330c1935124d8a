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
        // Conversation control
        .route("/conversation/connect", post(handlers::connect))
        .route("/conversation/disconnect", post(handlers::disconnect))
        .route("/conversation/mute", post(handlers::set_muted))
        // Conversation queries
        .route("/conversation/status", get(handlers::status))
        .route("/conversation/spectrum/input", get(handlers::input_spectrum))
        .route("/conversation/spectrum/output", get(handlers::output_spectrum))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
