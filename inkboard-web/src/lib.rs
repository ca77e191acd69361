//! Inkboard Web Server
//!
//! HTTP and WebSocket surface for the Inkboard drawing dashboard: CSRF
//! protection, link-share management and the realtime collaboration channel.

pub mod auth;
pub mod client_identity;
pub mod csrf;
#[cfg(feature = "sqlite")]
pub mod database;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod security;
pub mod server;
pub mod state;
pub mod websocket;

// Re-export main types
pub use server::InkboardServer;
pub use state::AppState;

use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        Method,
    },
    Router,
};
use inkboard_core::InkboardConfig;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

/// Create the main application router
pub fn create_app(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        // API routes, guarded by CSRF protection on mutating methods
        .nest(
            "/api",
            routes::api_routes().route_layer(axum::middleware::from_fn_with_state(
                state.clone(),
                middleware::csrf_protection,
            )),
        )
        // WebSocket routes
        .nest("/ws", routes::websocket_routes())
        // Add middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024)) // 2MB max body size
        .with_state(state)
}

/// Configure CORS from the same origin allow-list the CSRF check uses
fn cors_layer(config: &WebConfig) -> CorsLayer {
    let mut origins: Vec<HeaderValue> = Vec::new();
    for origin in &config.inkboard.csrf.allowed_origins {
        match origin.parse::<HeaderValue>() {
            Ok(value) => origins.push(value),
            Err(_) => warn!(origin, "Ignoring unparsable allowed origin"),
        }
    }
    if config.inkboard.csrf.dev_mode {
        for origin in ["http://localhost:3000", "http://127.0.0.1:3000"] {
            if let Ok(value) = origin.parse::<HeaderValue>() {
                origins.push(value);
            }
        }
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_credentials(true)
        .allow_headers([
            AUTHORIZATION,
            ACCEPT,
            CONTENT_TYPE,
            HeaderName::from_static(csrf::CSRF_HEADER),
        ])
}

/// Configuration for the web server
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Core authorization configuration
    pub inkboard: InkboardConfig,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            inkboard: InkboardConfig::default(),
        }
    }
}

impl WebConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut inkboard = InkboardConfig::default();
        inkboard.storage.database_url = std::env::var("DATABASE_URL").ok();
        inkboard.csrf.dev_mode = std::env::var("INKBOARD_DEV_MODE")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);
        if let Ok(origins) = std::env::var("INKBOARD_ALLOWED_ORIGINS") {
            inkboard.csrf.allowed_origins = origins
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect();
        }

        Self {
            host: std::env::var("INKBOARD_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: std::env::var("INKBOARD_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            inkboard,
        }
    }

    /// Get the server address
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Error types for the web server
#[derive(thiserror::Error, Debug)]
pub enum WebError {
    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] inkboard_core::InkboardError),
}

/// Result type for web operations
pub type WebResult<T> = Result<T, WebError>;
