//!
//! Response relay.
//!
//! Turns an upstream response into the client response. Non-streaming calls
//! are read in full and answered as JSON. Streaming calls are copied chunk by
//! chunk through a bounded channel, so the whole stream is never held in
//! memory and a disconnected client stops the upstream read. When a streaming
//! call does not come back as an event stream the configured fallback decides
//! what the client gets.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::chat::ChatRequest;
use crate::config::StreamFallback;
use crate::error::{ProxyError, Result};
use crate::server::AppState;

/* --- constants ------------------------------------------------------------------------------ */

/** Content type of relayed event streams */
pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream; charset=utf-8";

/** Body sent when upstream fails a streaming call without saying why */
const UPSTREAM_ERROR_TEXT: &str = "Upstream error";

/** Terminal marker of an OpenAI-style stream */
const DONE_MARKER: &str = "[DONE]";

/** Longest line prefix the frame tracker keeps; enough for `data: [DONE]` */
const MAX_TRACKED_LINE: usize = 64;

/* --- types ----------------------------------------------------------------------------------- */

///
/// Counts SSE events passing through the relay.
///
/// Chunks are forwarded untouched; this only watches for the blank lines that
/// end an event (`\n`, `\r\n` or `\r` line endings) and the `data: [DONE]`
/// marker so the end of a stream can be logged. Only the head of the current
/// line is kept, so memory stays flat however long the stream runs.
#[derive(Debug, Default)]
pub struct FrameTracker {
    /** first bytes of the line being read */
    line: Vec<u8>,
    /** full length of the line being read */
    line_len: usize,
    /** last byte was `\r`, so a following `\n` belongs to the same line end */
    after_cr: bool,
    /** current event has at least one line */
    in_event: bool,
    /** current event carries `data: [DONE]` */
    event_done: bool,
    /** complete events seen */
    events: usize,
    /** whether `data: [DONE]` was seen */
    done: bool,
}

///
/// Summary of one relayed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    /** chunks handed to the client body */
    pub chunks: usize,
    /** complete SSE events observed */
    pub events: usize,
    /** whether the stream ended with `data: [DONE]` */
    pub done: bool,
    /** whether the client went away before upstream finished */
    pub client_closed: bool,
    /** whether upstream failed mid-stream */
    pub upstream_failed: bool,
}

/* --- start of code -------------------------------------------------------------------------- */

impl FrameTracker {
    /// Feed one chunk
    pub fn observe(&mut self, chunk: &[u8]) {
        for &byte in chunk {
            if byte == b'\n' && self.after_cr {
                self.after_cr = false;
                continue;
            }
            self.after_cr = byte == b'\r';

            if byte == b'\r' || byte == b'\n' {
                self.end_line();
            } else {
                self.line_len += 1;
                if self.line.len() < MAX_TRACKED_LINE {
                    self.line.push(byte);
                }
            }
        }
    }

    fn end_line(&mut self) {
        if self.line_len == 0 {
            if self.in_event {
                self.events += 1;
                self.done |= self.event_done;
            }
            self.in_event = false;
            self.event_done = false;
            return;
        }

        self.in_event = true;
        if self.line_len <= MAX_TRACKED_LINE {
            let line = String::from_utf8_lossy(&self.line);
            if extract_sse_data(&line).is_some_and(|data| data.trim() == DONE_MARKER) {
                self.event_done = true;
            }
        }
        self.line.clear();
        self.line_len = 0;
    }

    pub fn events(&self) -> usize {
        self.events
    }

    pub fn done(&self) -> bool {
        self.done
    }
}

///
/// Extract data from SSE line if it's a data event.
fn extract_sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(|data| data.strip_prefix(' ').unwrap_or(data))
}

///
/// Build the client response for one upstream response.
///
/// # Arguments
///  * `state` - shared application state (configuration and upstream client)
///  * `request` - the normalized request that produced `response`
///  * `response` - upstream response, body not yet read
///
/// # Returns
///  * Client response: JSON, event stream, or relayed upstream error
///  * `ProxyError::UpstreamUnavailable` if the body cannot be read or the
///    fallback call fails in transport
pub async fn respond(
    state: &Arc<AppState>,
    request: &ChatRequest,
    response: reqwest::Response,
) -> Result<Response> {
    if !request.stream {
        return relay_buffered(response).await;
    }

    let success = response.status().is_success();
    if success && is_event_stream(&response) {
        return Ok(relay_stream(state, response));
    }

    match state.config.streaming.fallback {
        StreamFallback::Retry if !success => {
            tracing::warn!(
                "Streaming call failed with {}, retrying once without streaming",
                response.status()
            );
            state.metrics.record_stream_fallback();
            drop(response);

            let retry = state.upstream.send(&request.with_stream(false)).await?;
            relay_buffered(retry).await
        }
        StreamFallback::Retry => {
            tracing::debug!("Streaming call answered without an event stream, relaying as JSON");
            state.metrics.record_stream_fallback();
            relay_buffered(response).await
        }
        StreamFallback::Passthrough => relay_passthrough(response).await,
    }
}

///
/// Read the whole upstream body and answer with it as JSON.
///
/// Status is 200 when upstream succeeded, otherwise the upstream status. A
/// body that is not JSON becomes `{}`.
pub async fn relay_buffered(response: reqwest::Response) -> Result<Response> {
    let upstream_status = response.status();
    let bytes = response.bytes().await.map_err(|e| {
        tracing::error!("Failed to read upstream body: {}", e);
        ProxyError::UpstreamUnavailable(e.to_string())
    })?;

    let data = serde_json::from_slice::<Value>(&bytes).unwrap_or_else(|e| {
        tracing::debug!("Upstream body is not JSON ({}), answering with {{}}", e);
        json!({})
    });

    let status = if upstream_status.is_success() {
        StatusCode::OK
    } else {
        tracing::warn!("Upstream returned {}", upstream_status);
        status_from_upstream(upstream_status)
    };

    Ok((status, Json(data)).into_response())
}

///
/// Relay the upstream status and body unchanged.
///
/// An empty error body is replaced by `Upstream error` as plain text.
pub async fn relay_passthrough(response: reqwest::Response) -> Result<Response> {
    let status = status_from_upstream(response.status());
    let content_type = response.headers().get(reqwest::header::CONTENT_TYPE).cloned();
    let bytes = response.bytes().await.map_err(|e| {
        tracing::error!("Failed to read upstream body: {}", e);
        ProxyError::UpstreamUnavailable(e.to_string())
    })?;

    if !status.is_success() {
        tracing::warn!("Relaying upstream error {} to client", status);
    }

    let (body, content_type) = if bytes.is_empty() && !status.is_success() {
        (Bytes::from_static(UPSTREAM_ERROR_TEXT.as_bytes()), None)
    } else {
        (bytes, content_type.and_then(|v| HeaderValue::from_bytes(v.as_bytes()).ok()))
    };

    let mut relayed = (status, body).into_response();
    relayed.headers_mut().insert(
        header::CONTENT_TYPE,
        content_type.unwrap_or_else(|| HeaderValue::from_static("text/plain; charset=utf-8")),
    );
    Ok(relayed)
}

///
/// Start relaying an upstream event stream.
///
/// A producer task pulls chunks from upstream and pushes them into a bounded
/// channel that backs the client body.
fn relay_stream(state: &Arc<AppState>, response: reqwest::Response) -> Response {
    let (tx, rx) = mpsc::channel::<std::result::Result<Bytes, Infallible>>(
        state.config.streaming.channel_capacity.max(1),
    );
    let state_clone = state.clone();

    tokio::spawn(async move {
        let outcome = pump_stream(response.bytes_stream(), tx).await;
        state_clone.metrics.record_stream_finished(&outcome);
    });

    let mut relayed = Response::new(Body::from_stream(ReceiverStream::new(rx)));
    let headers = relayed.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(EVENT_STREAM_CONTENT_TYPE));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache, no-transform"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    relayed
}

///
/// Copy chunks from `upstream` into `tx` until either side closes.
///
/// The client body being dropped is noticed while waiting on upstream as well
/// as on send; the loop stops and the upstream stream is dropped with it. An
/// upstream error ends the stream after a best-effort `event: error` frame.
///
/// # Arguments
///  * `upstream` - upstream body chunks
///  * `tx` - channel feeding the client body
///
/// # Returns
///  * Summary of what was relayed
pub async fn pump_stream<S, E>(
    upstream: S,
    tx: mpsc::Sender<std::result::Result<Bytes, Infallible>>,
) -> RelayOutcome
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let mut upstream = std::pin::pin!(upstream);
    let mut tracker = FrameTracker::default();
    let mut chunks = 0;
    let mut client_closed = false;
    let mut upstream_failed = false;

    loop {
        let next = tokio::select! {
            biased;
            _ = tx.closed() => {
                tracing::debug!("Client disconnected while waiting on upstream, stopping relay");
                client_closed = true;
                break;
            }
            next = upstream.next() => next,
        };
        let Some(chunk_result) = next else {
            break;
        };

        match chunk_result {
            Ok(chunk) => {
                tracker.observe(&chunk);
                if tx.send(Ok(chunk)).await.is_err() {
                    tracing::debug!("Client disconnected, stopping relay");
                    client_closed = true;
                    break;
                }
                chunks += 1;
            }
            Err(e) => {
                tracing::error!("Stream chunk error: {}", e);
                upstream_failed = true;
                let _ = tx.send(Ok(error_frame(&e.to_string()))).await;
                break;
            }
        }
    }

    let outcome = RelayOutcome {
        chunks,
        events: tracker.events(),
        done: tracker.done(),
        client_closed,
        upstream_failed,
    };
    tracing::debug!(
        "Stream relay finished: chunks={} events={} done={} client_closed={}",
        outcome.chunks,
        outcome.events,
        outcome.done,
        outcome.client_closed
    );
    outcome
}

/// SSE frame reporting a mid-stream failure
fn error_frame(message: &str) -> Bytes {
    let data = json!({ "error": { "message": format!("Upstream stream failed: {}", message) } });
    Bytes::from(format!("event: error\ndata: {}\n\n", data))
}

fn is_event_stream(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().to_ascii_lowercase().starts_with("text/event-stream"))
}

fn status_from_upstream(status: reqwest::StatusCode) -> StatusCode {
    StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY)
}

/* --- tests ------------------------------------------------------------------------------- */
