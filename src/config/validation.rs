//!
//! Configuration validation for chatrelay.
//!
//! Collects every problem in one pass so `chatrelay doctor` can print them
//! all. Errors stop startup; warnings are logged and the server still runs.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use crate::config::{Config, LogLevel};
use crate::error::{ProxyError, Result};

/* --- types ----------------------------------------------------------------------------------- */

/// How serious a validation finding is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationSeverity {
    Error,
    Warning,
    Info,
}

///
/// One validation finding.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    /// Setting the finding is about, named as its environment variable
    pub field: String,
    pub message: String,
    pub severity: ValidationSeverity,
    /// How to fix it, when there is an obvious fix
    pub suggestion: Option<String>,
}

///
/// Configuration validator.
///
/// Covers network settings, the upstream endpoint and credential, the access
/// policy, rate limit parameters and request defaults.
pub struct ConfigValidator<'a> {
    /// Configuration to validate
    config: &'a Config,
    /// Findings collected so far
    issues: Vec<ValidationIssue>,
}

/* --- implementations --------------------------------------------------------------------- */

impl<'a> ConfigValidator<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config, issues: Vec::new() }
    }

    /// Run every rule and return the findings
    pub fn issues(mut self) -> Vec<ValidationIssue> {
        self.validate_server_config();
        self.validate_upstream_config();
        self.validate_access_config();
        self.validate_rate_limit_config();
        self.validate_chat_defaults();
        self.validate_streaming_config();
        self.issues
    }

    /// Run every rule, log warnings, and fail if any error was found
    ///
    /// # Returns
    /// * `Ok(())` - no errors (there may be warnings)
    /// * `Err(ProxyError::Config)` - one or more errors, numbered in the message
    pub fn validate(self) -> Result<()> {
        let issues = self.issues();

        for issue in issues.iter().filter(|i| i.severity == ValidationSeverity::Warning) {
            tracing::warn!("Configuration warning: {}: {}", issue.field, issue.message);
        }

        let errors: Vec<&ValidationIssue> =
            issues.iter().filter(|i| i.severity == ValidationSeverity::Error).collect();

        if !errors.is_empty() {
            let error_msg = format!(
                "Configuration validation failed with {} error(s):\n\n{}\n\
                 \n\
                 Please fix these issues and try again.",
                errors.len(),
                errors
                    .iter()
                    .enumerate()
                    .map(|(i, e)| format!("{}. {}: {}", i + 1, e.field, e.message))
                    .collect::<Vec<_>>()
                    .join("\n")
            );
            return Err(ProxyError::Config(error_msg));
        }

        Ok(())
    }

    /* --- private validation methods ------------------------------------------------------ */

    fn validate_server_config(&mut self) {
        let server = &self.config.server;

        if server.port == 0 {
            self.add_error("PORT", "Invalid server port 0: must be between 1 and 65535", None);
        } else if server.port < 1024 {
            self.add_warning(
                "PORT",
                &format!("Server port {} requires root/administrator privileges", server.port),
                Some("Use a port above 1024 behind a reverse proxy"),
            );
        }

        if server.host.trim().is_empty() {
            self.add_error("HOST", "Bind address cannot be empty", Some("HOST=0.0.0.0"));
        }

        if server.body_limit_bytes == 0 {
            self.add_error("BODY_LIMIT_BYTES", "Body limit cannot be zero", None);
        } else if server.body_limit_bytes < 1024 {
            self.add_warning(
                "BODY_LIMIT_BYTES",
                &format!(
                    "Body limit of {} bytes will reject most conversations",
                    server.body_limit_bytes
                ),
                None,
            );
        }

        if server.log_level == LogLevel::Trace {
            self.add_warning(
                "LOG_LEVEL",
                "Trace log level enabled: may log sensitive information in production",
                None,
            );
        }
    }

    fn validate_upstream_config(&mut self) {
        let upstream = &self.config.upstream;

        if !upstream.base_url.starts_with("http://") && !upstream.base_url.starts_with("https://")
        {
            self.add_error(
                "OPENAI_BASE_URL",
                &format!("Base URL '{}' must start with http:// or https://", upstream.base_url),
                Some("OPENAI_BASE_URL=https://api.openai.com"),
            );
        }

        if upstream.base_url.trim_end_matches('/').ends_with("/v1/chat/completions") {
            self.add_warning(
                "OPENAI_BASE_URL",
                "Base URL already contains /v1/chat/completions; the path is appended automatically",
                None,
            );
        }

        if !self.config.has_credential() {
            self.add_warning(
                "OPENAI_API_KEY",
                "Upstream credential is not set: every /chat request will fail with 500",
                Some("export OPENAI_API_KEY=\"sk-...\""),
            );
        }

        if upstream.timeout_secs == 0 {
            self.add_error("UPSTREAM_TIMEOUT_SECS", "Upstream timeout cannot be zero", None);
        } else if upstream.timeout_secs < 30 {
            self.add_warning(
                "UPSTREAM_TIMEOUT_SECS",
                &format!(
                    "Upstream timeout of {}s also caps streamed responses and may cut long generations",
                    upstream.timeout_secs
                ),
                None,
            );
        }

        if upstream.connect_timeout_secs == 0 {
            self.add_error(
                "UPSTREAM_CONNECT_TIMEOUT_SECS",
                "Upstream connect timeout cannot be zero",
                None,
            );
        }
    }

    fn validate_access_config(&mut self) {
        let access = &self.config.access;

        for origin in &access.cors_origins {
            if origin != "*" && !origin.starts_with("http://") && !origin.starts_with("https://") {
                self.add_error(
                    "CORS_ORIGINS",
                    &format!("Origin '{}' must be '*' or start with http:// or https://", origin),
                    None,
                );
            } else if origin.ends_with('/') {
                self.add_warning(
                    "CORS_ORIGINS",
                    &format!("Origin '{}' has a trailing slash and will never match a browser Origin header", origin),
                    Some("Remove the trailing slash"),
                );
            }
        }

        let token_set = access.app_token.as_deref().is_some_and(|t| !t.is_empty());
        if !token_set && !self.config.cors_restricted() {
            self.add_info(
                "APP_TOKEN",
                "No shared secret and no origin allowlist: the proxy is open to any caller",
                Some("Set APP_TOKEN or CORS_ORIGINS before exposing the server publicly"),
            );
        }
    }

    fn validate_rate_limit_config(&mut self) {
        let rate_limit = &self.config.rate_limit;

        if rate_limit.points == 0 {
            self.add_error(
                "RATE_LIMIT_POINTS",
                "Rate limit points cannot be zero: every request would be rejected",
                None,
            );
        }

        if rate_limit.duration_secs == 0 {
            self.add_error("RATE_LIMIT_DURATION", "Rate limit window cannot be zero", None);
        }

        if rate_limit.trusted_ip_header.trim().is_empty() {
            self.add_error(
                "TRUSTED_IP_HEADER",
                "Trusted IP header name cannot be empty",
                Some("TRUSTED_IP_HEADER=cf-connecting-ip"),
            );
        } else if axum::http::HeaderName::from_bytes(rate_limit.trusted_ip_header.as_bytes())
            .is_err()
        {
            self.add_error(
                "TRUSTED_IP_HEADER",
                &format!("'{}' is not a valid header name", rate_limit.trusted_ip_header),
                None,
            );
        }
    }

    fn validate_chat_defaults(&mut self) {
        let defaults = &self.config.defaults;

        if defaults.model.trim().is_empty() {
            self.add_error("DEFAULT_MODEL", "Default model cannot be empty", None);
        }

        if defaults.max_tokens == 0 {
            self.add_warning(
                "MAX_TOKENS",
                "Default max_tokens is 0: requests that omit it will produce empty completions",
                None,
            );
        }

        if !(0.0..=2.0).contains(&defaults.temperature) {
            self.add_warning(
                "TEMPERATURE",
                &format!(
                    "Default temperature {} is outside the usual 0.0-2.0 range",
                    defaults.temperature
                ),
                None,
            );
        }
    }

    fn validate_streaming_config(&mut self) {
        if self.config.streaming.channel_capacity == 0 {
            self.add_error(
                "STREAM_CHANNEL_CAPACITY",
                "Stream channel capacity must be at least 1",
                None,
            );
        }
    }

    fn add_error(&mut self, field: &str, message: &str, suggestion: Option<&str>) {
        self.push(field, message, ValidationSeverity::Error, suggestion);
    }

    fn add_warning(&mut self, field: &str, message: &str, suggestion: Option<&str>) {
        self.push(field, message, ValidationSeverity::Warning, suggestion);
    }

    fn add_info(&mut self, field: &str, message: &str, suggestion: Option<&str>) {
        self.push(field, message, ValidationSeverity::Info, suggestion);
    }

    fn push(
        &mut self,
        field: &str,
        message: &str,
        severity: ValidationSeverity,
        suggestion: Option<&str>,
    ) {
        tracing::debug!("Validation {:?}: {}: {}", severity, field, message);
        self.issues.push(ValidationIssue {
            field: field.to_string(),
            message: message.to_string(),
            severity,
            suggestion: suggestion.map(str::to_string),
        });
    }
}

/* --- tests ------------------------------------------------------------------------------- */
