//!
//! Error handling for the chat relay server.
//!
//! Defines every failure the request pipeline can produce and how each one is
//! rendered to the client. All variants end the current request with a JSON
//! body of the form `{ "error": { "message": ... } }`.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/* --- types ----------------------------------------------------------------------------------- */

///
/// Application error types.
///
/// Request-time variants map one-to-one onto HTTP statuses (see
/// [`ProxyError::status_code`]); `Config` and `Http` are raised while starting up.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Origin not allowed")]
    OriginNotAllowed,

    #[error("Too many requests")]
    RateLimited {
        /** seconds until the caller's bucket refills */
        retry_after_secs: u64,
    },

    #[error("{0}")]
    BadRequest(String),

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("OPENAI_API_KEY missing")]
    MissingCredential,

    #[error("Upstream request failed: {0}")]
    UpstreamUnavailable(String),
}

/* --- start of code -------------------------------------------------------------------------- */

/// Result type alias for cleaner error handling throughout the application
pub type Result<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    ///
    /// HTTP status used when this error is returned to a client.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Unauthorized => StatusCode::UNAUTHORIZED,
            ProxyError::OriginNotAllowed => StatusCode::FORBIDDEN,
            ProxyError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            ProxyError::MissingCredential | ProxyError::Config(_) | ProxyError::Http(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match self {
            ProxyError::RateLimited { retry_after_secs } => {
                let mut response = error_body(status, &self.to_string());
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
                response
            }
            other => {
                if status.is_server_error() {
                    tracing::error!("Request failed: {}", other);
                } else {
                    tracing::debug!("Request rejected: {}", other);
                }
                error_body(status, &other.to_string())
            }
        }
    }
}

///
/// Build the JSON error body shared by every non-stream failure.
fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": { "message": message } }))).into_response()
}

/* --- tests ------------------------------------------------------------------------------- */
