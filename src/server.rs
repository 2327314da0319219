//!
//! HTTP handlers and shared state for the chat relay.
//!
//! `/chat` runs the handler stages in order: read the body, validate and
//! normalize it, forward it upstream, relay the answer. Each stage returns a
//! `Result`, and the first error becomes the client response. Access and rate
//! limiting run earlier as middleware (see [`crate::create_app`]).
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::extract::rejection::BytesRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use crate::chat;
use crate::config::Config;
use crate::error::{ProxyError, Result};
use crate::ratelimit::RateLimiter;
use crate::relay::{self, RelayOutcome};
use crate::upstream::UpstreamClient;

/* --- types ----------------------------------------------------------------------------------- */

///
/// Application state containing all dependencies.
///
/// Built once at startup and shared by `Arc` between handlers and middleware.
pub struct AppState {
    /** application configuration */
    pub config: Config,
    /** per-client admission control */
    pub limiter: RateLimiter,
    /** client for the upstream completion API */
    pub upstream: UpstreamClient,
    /** metrics for monitoring */
    pub metrics: AppMetrics,
}

///
/// Application metrics for monitoring and observability.
///
/// Counters only; they are logged at shutdown and never exposed over HTTP.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /** chat requests that reached the handler */
    pub total_requests: AtomicU64,
    /** chat requests answered without an error */
    pub successful_requests: AtomicU64,
    /** chat requests answered with an error */
    pub failed_requests: AtomicU64,
    /** requests turned away by the token or origin check */
    pub rejected_requests: AtomicU64,
    /** requests turned away by the rate limiter */
    pub rate_limited: AtomicU64,
    /** streaming calls answered through the fallback path */
    pub stream_fallbacks: AtomicU64,
    /** event streams that ended because the client went away */
    pub client_disconnects: AtomicU64,
    /** event streams cut short by an upstream read error */
    pub stream_errors: AtomicU64,
}

/* --- start of code -------------------------------------------------------------------------- */

impl AppState {
    ///
    /// Create application state with all dependencies.
    ///
    /// # Arguments
    ///  * `config` - application configuration
    ///
    /// # Returns
    ///  * Application state with initialized dependencies
    ///  * `ProxyError::Http` if the upstream client cannot be built
    pub fn new(config: Config) -> Result<Self> {
        let limiter = RateLimiter::from_config(&config.rate_limit);
        let upstream = UpstreamClient::new(&config.upstream)?;

        Ok(Self { config, limiter, upstream, metrics: AppMetrics::default() })
    }
}

impl AppMetrics {
    pub fn record_rejected(&self) {
        self.rejected_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stream_fallback(&self) {
        self.stream_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stream_finished(&self, outcome: &RelayOutcome) {
        if outcome.client_closed {
            self.client_disconnects.fetch_add(1, Ordering::Relaxed);
        }
        if outcome.upstream_failed {
            self.stream_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Log every counter at info level
    pub fn log_summary(&self) {
        tracing::info!(
            "Requests: total={} ok={} failed={} rejected={} rate_limited={} fallbacks={} disconnects={} stream_errors={}",
            self.total_requests.load(Ordering::Relaxed),
            self.successful_requests.load(Ordering::Relaxed),
            self.failed_requests.load(Ordering::Relaxed),
            self.rejected_requests.load(Ordering::Relaxed),
            self.rate_limited.load(Ordering::Relaxed),
            self.stream_fallbacks.load(Ordering::Relaxed),
            self.client_disconnects.load(Ordering::Relaxed),
            self.stream_errors.load(Ordering::Relaxed)
        );
    }
}

///
/// Handle the chat endpoint.
///
/// # Arguments
///  * `state` - shared application state
///  * `body` - raw request body, JSON or text
///
/// # Returns
///  * JSON completion, event stream, or JSON error
pub async fn chat(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    state.metrics.total_requests.fetch_add(1, Ordering::Relaxed);

    match process_chat(&state, body).await {
        Ok(response) => {
            state.metrics.successful_requests.fetch_add(1, Ordering::Relaxed);
            response
        }
        Err(e) => {
            state.metrics.failed_requests.fetch_add(1, Ordering::Relaxed);
            e.into_response()
        }
    }
}

///
/// Process a chat request end-to-end.
///
/// # Arguments
///  * `state` - shared application state
///  * `body` - raw request body or the reason it could not be read
///
/// # Returns
///  * HTTP response on success
///  * `ProxyError` from the first stage that failed
async fn process_chat(
    state: &Arc<AppState>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Result<Response> {
    let body = read_body(body)?;
    let request = chat::validate(&body, &state.config)?;

    tracing::debug!(
        "Chat request: model={} messages={} stream={}",
        request.model,
        request.messages.len(),
        request.stream
    );

    let upstream_response = state.upstream.send(&request).await?;
    relay::respond(state, &request, upstream_response).await
}

/// Map a body extraction failure onto the error taxonomy
fn read_body(body: std::result::Result<Bytes, BytesRejection>) -> Result<Bytes> {
    body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ProxyError::PayloadTooLarge
        } else {
            ProxyError::BadRequest(rejection.body_text())
        }
    })
}

///
/// Handle health check endpoint.
///
/// # Returns
///  * `{"ok": true}`
pub async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

/* --- tests ------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_body() {
        let Json(body) = health().await;
        assert_eq!(body, json!({ "ok": true }));
    }

    #[tokio::test]
    async fn test_state_uses_configured_limits() {
        let mut config = Config::default();
        config.rate_limit.points = 7;

        let state = AppState::new(config).unwrap();
        assert_eq!(state.limiter.points(), 7);
        assert_eq!(state.upstream.url(), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn test_stream_disconnects_are_counted() {
        let metrics = AppMetrics::default();
        let outcome = RelayOutcome {
            chunks: 2,
            events: 2,
            done: false,
            client_closed: true,
            upstream_failed: false,
        };

        metrics.record_stream_finished(&outcome);
        metrics.record_stream_finished(&RelayOutcome { client_closed: false, ..outcome });
        assert_eq!(metrics.client_disconnects.load(Ordering::Relaxed), 1);
    }
}
