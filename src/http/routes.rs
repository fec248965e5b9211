use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Session lifecycle
        .route("/session/status", get(handlers::get_status))
        .route("/session/connect", post(handlers::connect))
        .route("/session/disconnect", post(handlers::disconnect))
        .route("/session/capture/start", post(handlers::start_capture))
        .route("/session/capture/stop", post(handlers::stop_capture))
        .route("/session/interrupt", post(handlers::interrupt))
        // Recorded chunks
        .route(
            "/session/chunks",
            get(handlers::list_chunks).delete(handlers::clear_chunks),
        )
        .route("/session/chunks/:chunk_id/replay", post(handlers::replay_chunk))
        // The console UI is served from another origin
        .layer(CorsLayer::permissive())
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
