//!
//! Chat request validation and normalization.
//!
//! The browser may post JSON or `text/plain` (to avoid a CORS preflight), so
//! the body arrives as raw bytes and is parsed here. Anything that is not a
//! JSON object is treated as an empty object and then fails the `messages`
//! check. Optional fields are filled from the configured defaults.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{ChatDefaults, Config};
use crate::error::{ProxyError, Result};

/* --- types ----------------------------------------------------------------------------------- */

///
/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

///
/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

///
/// Validated chat request with every default merged in.
///
/// Serializes to exactly the payload sent upstream:
/// `{model, messages, stream, max_tokens, temperature}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    /** model identifier */
    pub model: String,
    /** conversation, never empty */
    pub messages: Vec<ChatMessage>,
    /** whether the client asked for an event stream */
    pub stream: bool,
    /** completion length cap, passed through as given */
    pub max_tokens: u32,
    /** sampling temperature */
    pub temperature: f64,
}

/* --- constants ------------------------------------------------------------------------------- */

/** Message returned when `messages` is missing, empty or not an array */
const MESSAGES_REQUIRED: &str = "messages required";

/* --- start of code -------------------------------------------------------------------------- */

impl Role {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

impl ChatRequest {
    /// Same request with a different `stream` flag
    pub fn with_stream(&self, stream: bool) -> Self {
        Self { stream, ..self.clone() }
    }
}

///
/// Validate a raw request body and merge defaults.
///
/// The upstream credential is checked first, so a misconfigured server
/// answers 500 regardless of the payload.
///
/// # Arguments
///  * `raw` - request body bytes, JSON or text
///  * `config` - server configuration (credential and defaults)
///
/// # Returns
///  * Normalized `ChatRequest`
///  * `ProxyError::MissingCredential` if no upstream key is configured
///  * `ProxyError::BadRequest` for missing messages or mistyped fields
pub fn validate(raw: &[u8], config: &Config) -> Result<ChatRequest> {
    if !config.has_credential() {
        return Err(ProxyError::MissingCredential);
    }

    let body = parse_body(raw);
    normalize(&body, &config.defaults)
}

///
/// Parse the body as a JSON object, substituting an empty object when the
/// bytes are not JSON or the JSON is not an object.
pub fn parse_body(raw: &[u8]) -> Map<String, Value> {
    match serde_json::from_slice::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            tracing::debug!("Request body is JSON but not an object, treating as empty");
            Map::new()
        }
        Err(e) => {
            tracing::debug!("Request body is not JSON ({}), treating as empty", e);
            Map::new()
        }
    }
}

///
/// Build a `ChatRequest` from a parsed body.
///
/// # Arguments
///  * `body` - request object
///  * `defaults` - values for absent or `null` optional fields
pub fn normalize(body: &Map<String, Value>, defaults: &ChatDefaults) -> Result<ChatRequest> {
    let messages = parse_messages(body.get("messages"))?;

    let stream = optional(body, "stream", "a boolean", Value::as_bool)?.unwrap_or(defaults.stream);
    let model = optional(body, "model", "a string", |v| v.as_str().map(str::to_string))?
        .unwrap_or_else(|| defaults.model.clone());
    let max_tokens = optional(body, "max_tokens", "a non-negative integer", |v| {
        v.as_u64().and_then(|n| u32::try_from(n).ok())
    })?
    .unwrap_or(defaults.max_tokens);
    let temperature =
        optional(body, "temperature", "a number", Value::as_f64)?.unwrap_or(defaults.temperature);

    Ok(ChatRequest { model, messages, stream, max_tokens, temperature })
}

fn parse_messages(value: Option<&Value>) -> Result<Vec<ChatMessage>> {
    let items = match value {
        Some(Value::Array(items)) if !items.is_empty() => items,
        _ => return Err(ProxyError::BadRequest(MESSAGES_REQUIRED.to_string())),
    };

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let role = item.get("role").and_then(Value::as_str).and_then(Role::parse);
            let content = item.get("content").and_then(Value::as_str);

            match (role, content) {
                (Some(role), Some(content)) => {
                    Ok(ChatMessage { role, content: content.to_string() })
                }
                (None, _) => Err(ProxyError::BadRequest(format!(
                    "messages[{}].role must be one of system, user, assistant",
                    index
                ))),
                (_, None) => Err(ProxyError::BadRequest(format!(
                    "messages[{}].content must be a string",
                    index
                ))),
            }
        })
        .collect()
}

/// Read an optional field; absent and `null` both mean "use the default"
fn optional<T>(
    body: &Map<String, Value>,
    key: &str,
    expected: &str,
    extract: impl Fn(&Value) -> Option<T>,
) -> Result<Option<T>> {
    match body.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => extract(value)
            .map(Some)
            .ok_or_else(|| ProxyError::BadRequest(format!("{} must be {}", key, expected))),
    }
}

/* --- tests ------------------------------------------------------------------------------- */
