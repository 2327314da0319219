//!
//! Per-client admission control.
//!
//! Each client identity owns a bucket of `points` tokens that is refilled in
//! full once its window elapses. A request takes one token; a client with an
//! empty bucket is turned away with 429 and nothing is taken. Buckets live in
//! memory only and are keyed by the address the edge proxy reports.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;

use crate::config::RateLimitConfig;
use crate::error::ProxyError;
use crate::server::AppState;

/* --- constants ------------------------------------------------------------------------------- */

/** Identity shared by every client whose address cannot be determined */
pub const UNKNOWN_CLIENT: &str = "unknown";

/** Limit advertised on admitted responses */
pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";

/** Tokens left in the caller's bucket after this request */
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

/* --- types ----------------------------------------------------------------------------------- */

///
/// Token bucket of one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBucket {
    /** tokens left in the current window */
    pub points_remaining: u32,
    /** instant at which the bucket is refilled */
    pub window_reset: Instant,
}

///
/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Request may proceed; one token was taken
    Allowed {
        /** tokens left after this request */
        remaining: u32,
    },
    /// Bucket is empty; nothing was taken
    Denied {
        /** time until the bucket refills */
        retry_after: Duration,
    },
}

///
/// In-memory token bucket limiter keyed by client identity.
///
/// All bucket updates go through a single lock, so concurrent requests from
/// the same client can never be admitted past the bucket capacity.
#[derive(Debug)]
pub struct RateLimiter {
    /** tokens per window */
    points: u32,
    /** window length */
    window: Duration,
    /** bucket table and pruning schedule */
    state: Mutex<LimiterState>,
}

#[derive(Debug)]
struct LimiterState {
    buckets: HashMap<String, RateBucket>,
    next_prune: Instant,
}

/* --- start of code -------------------------------------------------------------------------- */

impl RateLimiter {
    ///
    /// Create a limiter granting `points` requests per `window`.
    ///
    /// # Arguments
    ///  * `points` - bucket capacity
    ///  * `window` - refill period
    pub fn new(points: u32, window: Duration) -> Self {
        Self {
            points,
            window,
            state: Mutex::new(LimiterState {
                buckets: HashMap::new(),
                next_prune: Instant::now() + window,
            }),
        }
    }

    /// Create a limiter from the rate limit section of the configuration
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.points, config.window())
    }

    /// Bucket capacity
    pub fn points(&self) -> u32 {
        self.points
    }

    /// Admit or deny one request from `identity` at the current time
    pub fn admit(&self, identity: &str) -> Admission {
        self.admit_at(identity, Instant::now())
    }

    ///
    /// Admit or deny one request from `identity` at `now`.
    ///
    /// A missing bucket is created full. A bucket whose window has elapsed is
    /// refilled before the check.
    ///
    /// # Arguments
    ///  * `identity` - client key
    ///  * `now` - time of the request
    ///
    /// # Returns
    ///  * `Admission::Allowed` with the tokens left, or `Admission::Denied`
    ///    with the time until the refill
    pub fn admit_at(&self, identity: &str, now: Instant) -> Admission {
        let mut state = self.state.lock();

        if now >= state.next_prune {
            state.buckets.retain(|_, bucket| bucket.window_reset > now);
            state.next_prune = now + self.window;
        }

        let bucket = state.buckets.entry(identity.to_string()).or_insert(RateBucket {
            points_remaining: self.points,
            window_reset: now + self.window,
        });

        if now >= bucket.window_reset {
            bucket.points_remaining = self.points;
            bucket.window_reset = now + self.window;
        }

        if bucket.points_remaining > 0 {
            bucket.points_remaining -= 1;
            Admission::Allowed { remaining: bucket.points_remaining }
        } else {
            Admission::Denied { retry_after: bucket.window_reset.saturating_duration_since(now) }
        }
    }

    /// Current bucket of `identity`, if one exists
    pub fn bucket(&self, identity: &str) -> Option<RateBucket> {
        self.state.lock().buckets.get(identity).copied()
    }

    /// Number of tracked identities
    pub fn tracked_clients(&self) -> usize {
        self.state.lock().buckets.len()
    }
}

///
/// Resolve the identity used as the limiter key.
///
/// Order: the trusted edge proxy header, then the leftmost `x-forwarded-for`
/// entry, then the socket peer address, then [`UNKNOWN_CLIENT`].
///
/// # Arguments
///  * `headers` - request headers
///  * `peer` - socket peer address, when the server was started with connect info
///  * `trusted_header` - name of the header set by the edge proxy
pub fn client_identity(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_header: &str,
) -> String {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    header_value(trusted_header)
        .or_else(|| {
            header_value("x-forwarded-for").and_then(|list| {
                list.split(',').next().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
            })
        })
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

///
/// Middleware admitting requests through the shared limiter.
///
/// Denied requests end here with 429 and a `retry-after` header; admitted
/// responses are tagged with the limit and the tokens left.
pub async fn enforce_rate_limit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request.extensions().get::<ConnectInfo<SocketAddr>>().map(|info| info.0);
    let identity =
        client_identity(request.headers(), peer, &state.config.rate_limit.trusted_ip_header);

    match state.limiter.admit(&identity) {
        Admission::Allowed { remaining } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from(state.limiter.points()));
            headers.insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from(remaining));
            response
        }
        Admission::Denied { retry_after } => {
            tracing::warn!("Rate limit exceeded for {}", identity);
            state.metrics.record_rate_limited();
            let retry_after_secs = retry_after_seconds(retry_after);
            let mut response = ProxyError::RateLimited { retry_after_secs }.into_response();
            response
                .headers_mut()
                .insert(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from(state.limiter.points()));
            response.headers_mut().insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from(0u32));
            response
        }
    }
}

/// Whole seconds for `retry-after`, rounded up, never below one
fn retry_after_seconds(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

/* --- tests ------------------------------------------------------------------------------- */
