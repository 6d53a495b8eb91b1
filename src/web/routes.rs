use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

// API Routes - REST API for programmatic access
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        Router::new()
            .route("/health", get(handlers::api::health))
            // Conversation
            .route("/ask", post(handlers::api::ask))
            .route("/reset", post(handlers::api::reset))
            // Schema inspection
            .route("/schema", get(handlers::api::get_schema)),
    )
}
