//! # chatrelay - browser-facing proxy for OpenAI-compatible chat completions
//!
//! Keeps the upstream API key on the server. A browser front end posts chat
//! requests to `/chat`; the proxy checks the optional shared secret and the
//! origin allowlist, rate limits per client address, validates and fills in
//! the request, forwards it upstream and relays the answer back, either as a
//! single JSON payload or as a live SSE stream.
//!
//! ## Library Usage
//!
//! ```rust,no_run
//! use std::net::SocketAddr;
//! use chatrelay::{Config, create_app};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load()?;
//!     let app = create_app(config)?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`] - Configuration layering, file location and validation
//! - [`guard`] - Shared-secret check and CORS policy
//! - [`ratelimit`] - Per-client token buckets
//! - [`chat`] - Request validation and defaults
//! - [`upstream`] - Upstream HTTP client
//! - [`relay`] - JSON and SSE response relay with stream fallback
//! - [`server`] - Shared state and route handlers
//! - [`error`] - Error types and their HTTP mapping

pub mod chat;
pub mod config;
pub mod error;
pub mod guard;
pub mod ratelimit;
pub mod relay;
pub mod server;
pub mod upstream;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

// Re-export commonly used types
pub use config::{Config, ValidationIssue, ValidationSeverity};
pub use error::ProxyError;

/// Creates a new chatrelay application with the given configuration.
///
/// Layers, outermost first: request tracing, origin allowlist, CORS, body
/// limit. `/chat` additionally runs the shared-secret check and then the rate
/// limiter; preflights are answered by the CORS layer and never reach them.
///
/// # Arguments
///
/// * `config` - Application configuration
///
/// # Returns
///
/// Returns an Axum Router. Serve it with
/// `into_make_service_with_connect_info::<SocketAddr>()` so the rate limiter
/// can fall back to the peer address.
///
/// # Errors
///
/// Returns a `ProxyError` if a CORS origin is invalid or the HTTP client
/// cannot be built.
pub fn create_app(config: Config) -> Result<Router, ProxyError> {
    build_router(Arc::new(server::AppState::new(config)?))
}

/// Build the router around existing state, so the caller keeps a handle on
/// the metrics.
pub fn build_router(app_state: Arc<server::AppState>) -> Result<Router, ProxyError> {
    let cors = guard::build_cors(&app_state.config.access)?;
    let body_limit = app_state.config.server.body_limit_bytes;

    let chat_guards = ServiceBuilder::new()
        .layer(middleware::from_fn_with_state(app_state.clone(), guard::require_app_token))
        .layer(middleware::from_fn_with_state(app_state.clone(), ratelimit::enforce_rate_limit));

    Ok(Router::new()
        .route("/health", get(server::health))
        .route("/chat", post(server::chat).route_layer(chat_guards))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn_with_state(app_state.clone(), guard::enforce_origin))
                .layer(cors)
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(app_state))
}
