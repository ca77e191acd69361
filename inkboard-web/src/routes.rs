//! Route definitions for the Inkboard web server

use crate::{handlers, websocket, AppState};
use axum::{
    routing::{delete, get, post},
    Router,
};

/// Create API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // CSRF token issuance
        .route("/csrf-token", get(handlers::csrf_token))
        // Sharing
        .route("/drawings/shared-with-me", get(handlers::shared_with_me))
        .route("/drawings/{id}/access", get(handlers::drawing_access))
        .route("/drawings/{id}/link-shares", post(handlers::create_link_share))
        .route(
            "/drawings/{id}/link-shares/{share_id}",
            delete(handlers::revoke_link_share),
        )
}

/// Create WebSocket routes
pub fn websocket_routes() -> Router<AppState> {
    Router::new()
        // Collaborative editing channel
        .route("/collab", get(websocket::collab_handler))
}
