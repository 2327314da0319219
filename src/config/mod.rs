//!
//! Configuration management for chatrelay.
//!
//! Settings come from three layers, highest priority first:
//! - environment variables (a `.env` file in the working directory is loaded too)
//! - a TOML file (`CHATRELAY_CONFIG`, or the platform user config directory)
//! - built-in defaults
//!
//! Split by concern:
//! - `loader.rs` - layering and env parsing
//! - `paths.rs` - config file location
//! - `validation.rs` - sanity checks run at startup and by `chatrelay doctor`
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- modules --------------------------------------------------------------------------------- */

pub mod loader;
pub mod paths;
pub mod validation;

/* --- uses ------------------------------------------------------------------------------------ */

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProxyError, Result};

pub use validation::{ValidationIssue, ValidationSeverity};

/* --- types ----------------------------------------------------------------------------------- */

///
/// Main application configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Upstream completion API
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Shared secret and CORS policy
    #[serde(default)]
    pub access: AccessConfig,
    /// Per-client admission control
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Values merged into chat requests that omit them
    #[serde(default)]
    pub defaults: ChatDefaults,
    /// Streaming relay behaviour
    #[serde(default)]
    pub streaming: StreamingConfig,
}

///
/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server port number
    #[serde(default = "default_port")]
    pub port: u16,
    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,
    /// Application logging level
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
    /// Largest accepted request body
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

///
/// Upstream chat-completions API.
#[derive(Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL; `/v1/chat/completions` is appended
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer credential; requests fail with 500 while it is unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Upper bound on one upstream call. Reading the body counts, so an event
    /// stream still running when it expires is cut off with an error frame;
    /// raise it for long generations
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

///
/// Access guard configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Allowed browser origins; empty or `*` allows any origin
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Shared secret expected in `x-app-token`; unset means open access
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_token: Option<String>,
}

///
/// Token bucket parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per window
    #[serde(default = "default_points")]
    pub points: u32,
    /// Window length in seconds
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,
    /// Header set by the edge proxy with the real client address
    #[serde(default = "default_trusted_ip_header")]
    pub trusted_ip_header: String,
}

///
/// Server-side defaults for optional chat request fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatDefaults {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_stream")]
    pub stream: bool,
}

///
/// Streaming relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// What to do when a streaming call does not come back as an event stream
    #[serde(default = "default_stream_fallback")]
    pub fallback: StreamFallback,
    /// Chunks buffered between the upstream reader and the client body
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

///
/// Behaviour when upstream answers a streaming request with an error or
/// with something other than `text/event-stream`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamFallback {
    /// Re-issue the request once with `stream: false` and relay the JSON result
    Retry,
    /// Relay the upstream status and body unchanged
    Passthrough,
}

///
/// Logging level enumeration.
///
/// Defines available log levels compatible with tracing crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/* --- defaults -------------------------------------------------------------------------------- */

/// Default HTTP port
fn default_port() -> u16 {
    3000
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

/// Default logging level
fn default_log_level() -> LogLevel {
    LogLevel::Info
}

/// Default body limit (1 MiB)
fn default_body_limit() -> usize {
    1024 * 1024
}

fn default_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_points() -> u32 {
    120
}

fn default_duration_secs() -> u64 {
    60
}

fn default_trusted_ip_header() -> String {
    "cf-connecting-ip".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    512
}

fn default_temperature() -> f64 {
    0.7
}

fn default_stream() -> bool {
    true
}

fn default_stream_fallback() -> StreamFallback {
    StreamFallback::Retry
}

/// Matches the channel depth used for SSE fan-out elsewhere in the server
fn default_channel_capacity() -> usize {
    100
}

/* --- implementations --------------------------------------------------------------------- */

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            log_level: default_log_level(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            points: default_points(),
            duration_secs: default_duration_secs(),
            trusted_ip_header: default_trusted_ip_header(),
        }
    }
}

impl Default for ChatDefaults {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            stream: default_stream(),
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self { fallback: default_stream_fallback(), channel_capacity: default_channel_capacity() }
    }
}

impl Config {
    /// Load configuration from the standard hierarchy:
    /// 1. Environment variables (including `.env`)
    /// 2. `CHATRELAY_CONFIG` file, or the user config file
    /// 3. Built-in defaults
    ///
    /// # Returns
    /// * `Ok(Config)` - Successfully loaded configuration
    /// * `Err(ProxyError)` - A file or variable could not be parsed, or validation found errors
    ///
    /// # Examples
    /// ```rust,no_run
    /// use chatrelay::config::Config;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = Config::load()?;
    /// println!("Server will run on port {}", config.server.port);
    /// # Ok(())
    /// # }
    /// ```
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let loader = loader::ConfigLoader::new().with_defaults();
        let loader = match paths::explicit_config_file()? {
            Some(path) => loader.with_config_file(path)?,
            None => loader.with_user_config()?,
        };

        loader.with_env_vars()?.build()
    }

    /// Run all validation rules and return every issue found
    pub fn validate(&self) -> Vec<ValidationIssue> {
        validation::ConfigValidator::new(self).issues()
    }

    /// Whether the upstream credential is present and non-empty
    pub fn has_credential(&self) -> bool {
        self.upstream.api_key.as_deref().is_some_and(|key| !key.trim().is_empty())
    }

    /// Whether CORS is restricted to an explicit origin list
    pub fn cors_restricted(&self) -> bool {
        !self.access.cors_origins.is_empty()
            && !self.access.cors_origins.iter().any(|origin| origin == "*")
    }

    /// Get configuration file example as TOML string
    pub fn example_toml() -> &'static str {
        r#"# chatrelay configuration
# Environment variables override every value below.

[server]
port = 3000
host = "0.0.0.0"
# trace, debug, info, warn, error
log_level = "info"
body_limit_bytes = 1048576

[upstream]
base_url = "https://api.openai.com"
# api_key = "sk-..."   (prefer OPENAI_API_KEY)
# Whole call including the streamed body; long generations need a higher value
timeout_secs = 300
connect_timeout_secs = 10

[access]
# Empty list or "*" allows every origin
cors_origins = ["https://app.example.com"]
# app_token = "shared-secret"   (clients send it as x-app-token)

[rate_limit]
points = 120
duration_secs = 60
trusted_ip_header = "cf-connecting-ip"

[defaults]
model = "gpt-4o-mini"
max_tokens = 512
temperature = 0.7
stream = true

[streaming]
# retry: repeat a failed streaming call once without streaming
# passthrough: relay the upstream error as-is
fallback = "retry"
channel_capacity = 100
"#
    }
}

impl UpstreamConfig {
    /// Full chat-completions endpoint
    pub fn chat_completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }
}

impl LogLevel {
    /// Convert to tracing::Level for logging setup
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }

    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(ProxyError::Config(format!(
                "Invalid log level '{}'. Valid levels are: trace, debug, info, warn, error",
                s
            ))),
        }
    }
}

impl StreamFallback {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "retry" | "non-streaming" => Ok(StreamFallback::Retry),
            "passthrough" | "pass-through" | "error" => Ok(StreamFallback::Passthrough),
            _ => Err(ProxyError::Config(format!(
                "Invalid stream fallback '{}'. Valid values are: retry, passthrough",
                s
            ))),
        }
    }
}

/* --- tests ------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.rate_limit.points, 120);
        assert_eq!(config.rate_limit.duration_secs, 60);
        assert_eq!(config.defaults.max_tokens, 512);
        assert_eq!(config.defaults.model, "gpt-4o-mini");
        assert!(config.defaults.stream);
        assert_eq!(config.streaming.fallback, StreamFallback::Retry);
        assert_eq!(config.upstream.timeout_secs, 300);
        assert!(Config::example_toml().contains("streamed body"));
        assert!(!config.has_credential());
        assert!(!config.cors_restricted());
    }

    #[test]
    fn test_chat_completions_url_trims_trailing_slash() {
        let mut upstream = UpstreamConfig::default();
        upstream.base_url = "http://localhost:8080/".to_string();
        assert_eq!(upstream.chat_completions_url(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn test_cors_wildcard_is_unrestricted() {
        let mut config = Config::default();
        config.access.cors_origins = vec!["*".to_string()];
        assert!(!config.cors_restricted());

        config.access.cors_origins = vec!["https://app.example.com".to_string()];
        assert!(config.cors_restricted());
    }

    #[test]
    fn test_blank_credential_is_missing() {
        let mut config = Config::default();
        config.upstream.api_key = Some("   ".to_string());
        assert!(!config.has_credential());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let mut upstream = UpstreamConfig::default();
        upstream.api_key = Some("sk-secret".to_string());
        let rendered = format!("{:?}", upstream);
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_example_toml_parses() {
        let config: Config = toml::from_str(Config::example_toml()).expect("example should parse");
        assert_eq!(config.access.cors_origins, vec!["https://app.example.com".to_string()]);
        assert_eq!(config.streaming.fallback, StreamFallback::Retry);
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!(LogLevel::from_str("WARNING").unwrap(), LogLevel::Warn);
        assert!(LogLevel::from_str("loud").is_err());
        assert_eq!(StreamFallback::from_str("Passthrough").unwrap(), StreamFallback::Passthrough);
        assert!(StreamFallback::from_str("sometimes").is_err());
    }
}
