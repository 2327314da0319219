//!
//! Access guard: shared-secret check and CORS policy.
//!
//! Both checks are optional. With no `APP_TOKEN` every caller passes the
//! token check; with no origin allowlist (or `*`) every origin is accepted.
//! When an allowlist is configured, cross-origin requests from other origins,
//! preflights included, are rejected with 403 before they reach a handler.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::uri::Scheme;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Uri, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::config::{AccessConfig, Config};
use crate::error::{ProxyError, Result};
use crate::server::AppState;

/* --- constants ------------------------------------------------------------------------------- */

/** Header carrying the shared secret */
pub const APP_TOKEN_HEADER: &str = "x-app-token";

/* --- start of code -------------------------------------------------------------------------- */

///
/// Middleware requiring the shared secret when one is configured.
///
/// Returns 401 Unauthorized with the JSON error body on a missing or wrong
/// `x-app-token`.
pub async fn require_app_token(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.access.app_token.as_deref().filter(|t| !t.is_empty())
    else {
        return next.run(request).await;
    };

    let provided = request.headers().get(APP_TOKEN_HEADER).map(HeaderValue::as_bytes);

    match provided {
        Some(token) if constant_time_eq(token, expected.as_bytes()) => next.run(request).await,
        _ => {
            tracing::warn!(
                "Unauthorized request to {} - missing or invalid {}",
                request.uri().path(),
                APP_TOKEN_HEADER
            );
            state.metrics.record_rejected();
            ProxyError::Unauthorized.into_response()
        }
    }
}

///
/// Middleware rejecting cross-origin requests from origins outside the
/// allowlist.
///
/// Requests without an `Origin` header and same-origin requests (the origin's
/// authority equals `Host`) always pass.
pub async fn enforce_origin(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if origin_permitted(&state.config, request.headers()) {
        return next.run(request).await;
    }

    tracing::warn!(
        "Rejected {} {} from origin {:?}",
        request.method(),
        request.uri().path(),
        request.headers().get(header::ORIGIN)
    );
    state.metrics.record_rejected();
    ProxyError::OriginNotAllowed.into_response()
}

///
/// Whether a request passes the origin allowlist.
///
/// # Arguments
///  * `config` - application configuration
///  * `headers` - request headers (`Origin` and `Host` are consulted)
pub fn origin_permitted(config: &Config, headers: &HeaderMap) -> bool {
    if !config.cors_restricted() {
        return true;
    }

    let Some(origin) = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) else {
        return true;
    };

    if config.access.cors_origins.iter().any(|allowed| allowed == origin) {
        return true;
    }

    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    match (origin_authority(origin), host) {
        (Some(authority), Some(host)) => authority.eq_ignore_ascii_case(host),
        _ => false,
    }
}

/// `host[:port]` part of an http(s) origin such as `https://app.example.com:8443`
fn origin_authority(origin: &str) -> Option<String> {
    let uri = origin.parse::<Uri>().ok()?;
    let scheme = uri.scheme()?;
    if *scheme != Scheme::HTTP && *scheme != Scheme::HTTPS {
        return None;
    }
    uri.authority()
        .map(|authority| authority.as_str().to_string())
        .filter(|authority| !authority.is_empty())
}

///
/// Build the CORS layer.
///
/// Allows GET, POST and OPTIONS with the headers the browser client sends.
/// An empty list or `*` allows any origin.
///
/// # Returns
///  * Configured `CorsLayer`
///  * `ProxyError::Config` if an origin is not a valid header value
pub fn build_cors(access: &AccessConfig) -> Result<CorsLayer> {
    let restricted =
        !access.cors_origins.is_empty() && !access.cors_origins.iter().any(|o| o == "*");

    let allow_origin = if restricted {
        let origins = access
            .cors_origins
            .iter()
            .map(|o| {
                o.parse::<HeaderValue>()
                    .map_err(|e| ProxyError::Config(format!("Invalid CORS origin '{}': {}", o, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        AllowOrigin::list(origins)
    } else {
        AllowOrigin::from(Any)
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(APP_TOKEN_HEADER),
        ]))
}

/// Compare two byte strings in time independent of where they differ
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/* --- tests ------------------------------------------------------------------------------- */
