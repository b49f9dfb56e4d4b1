use super::handlers;
use super::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let upload_limit = state.upload_limit;

    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Media
        .route("/media", get(handlers::list_media))
        .route(
            "/media/:name",
            put(handlers::upload_media).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/uploads/:id", delete(handlers::delete_upload))
        // Session control
        .route("/session/start", post(handlers::start_session))
        .route("/session/stop", post(handlers::stop_session))
        // Session queries
        .route("/session/status", get(handlers::get_session_status))
        .route("/session/logs", get(handlers::get_session_logs))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
