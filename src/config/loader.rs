//!
//! Configuration loading system for chatrelay.
//!
//! Layers, lowest priority first:
//! 1. Built-in defaults
//! 2. TOML config file
//! 3. Environment variables
//!
//! The loader is a small builder; each step returns `self` so the layers read
//! top to bottom at the call site.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use crate::config::paths;
use crate::config::validation::ConfigValidator;
use crate::config::{Config, LogLevel, StreamFallback};
use crate::error::{ProxyError, Result};

use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::str::FromStr;

/* --- constants ------------------------------------------------------------------------------- */

/** Environment variables understood by the loader */
const ENV_KEYS: &[&str] = &[
    "PORT",
    "HOST",
    "LOG_LEVEL",
    "BODY_LIMIT_BYTES",
    "OPENAI_BASE_URL",
    "OPENAI_API_KEY",
    "UPSTREAM_TIMEOUT_SECS",
    "UPSTREAM_CONNECT_TIMEOUT_SECS",
    "CORS_ORIGINS",
    "APP_TOKEN",
    "TRUSTED_IP_HEADER",
    "RATE_LIMIT_POINTS",
    "RATE_LIMIT_DURATION",
    "DEFAULT_MODEL",
    "MAX_TOKENS",
    "TEMPERATURE",
    "DEFAULT_STREAM",
    "STREAM_FALLBACK",
    "STREAM_CHANNEL_CAPACITY",
];

/* --- types ----------------------------------------------------------------------------------- */

///
/// Configuration loader implementing the Builder pattern.
pub struct ConfigLoader {
    /// Current configuration being built
    config: Config,
    /// Environment variable overrides collected
    env_overrides: HashMap<String, String>,
    /// Whether defaults have been applied
    defaults_applied: bool,
}

/* --- implementations --------------------------------------------------------------------- */

impl ConfigLoader {
    /// Create a new configuration loader
    ///
    /// # Examples
    /// ```rust,no_run
    /// use chatrelay::config::loader::ConfigLoader;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = ConfigLoader::new()
    ///     .with_defaults()
    ///     .with_user_config()?
    ///     .with_env_vars()?
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new() -> Self {
        Self { config: Config::default(), env_overrides: HashMap::new(), defaults_applied: false }
    }

    /// Apply built-in default values
    pub fn with_defaults(mut self) -> Self {
        self.config = Config::default();
        self.defaults_applied = true;
        self
    }

    /// Load the per-user config file if it exists; a missing file is not an error
    pub fn with_user_config(mut self) -> Result<Self> {
        let user_config_path = match paths::user_config_file() {
            Ok(path) => path,
            Err(e) => {
                tracing::debug!("Skipping user config: {}", e);
                return Ok(self);
            }
        };

        if user_config_path.exists() {
            tracing::debug!("Loading user config from: {}", user_config_path.display());
            self.load_config_file(&user_config_path)?;
        } else {
            tracing::debug!("User config not found at: {}", user_config_path.display());
        }

        Ok(self)
    }

    /// Load configuration from a specific file, which must exist
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!("Loading custom config from: {}", path.display());
        self.load_config_file(path)?;
        Ok(self)
    }

    /// Apply environment variable overrides
    ///
    /// Empty values are ignored so that `APP_TOKEN=` in a `.env` file keeps
    /// access open instead of requiring an empty token.
    pub fn with_env_vars(mut self) -> Result<Self> {
        tracing::debug!("Loading configuration from environment variables");

        for key in ENV_KEYS {
            if let Ok(value) = env::var(key) {
                if !value.trim().is_empty() {
                    self.env_overrides.insert((*key).to_string(), value);
                }
            }
        }

        self.apply_env_overrides()?;

        Ok(self)
    }

    /// Validate and return the final configuration
    ///
    /// # Returns
    /// * `Ok(Config)` - no validation errors (warnings are logged)
    /// * `Err(ProxyError::Config)` - at least one validation error
    pub fn build(self) -> Result<Config> {
        if !self.defaults_applied {
            return Err(ProxyError::Config(
                "Configuration loader must call with_defaults() before build()".to_string(),
            ));
        }

        ConfigValidator::new(&self.config).validate()?;

        tracing::debug!(
            "Final config: server.port={}, server.log_level={:?}, rate_limit={}/{}s, streaming.fallback={:?}",
            self.config.server.port,
            self.config.server.log_level,
            self.config.rate_limit.points,
            self.config.rate_limit.duration_secs,
            self.config.streaming.fallback
        );

        Ok(self.config)
    }

    /// Return the layered configuration without validating it
    pub fn into_config(self) -> Config {
        self.config
    }

    /* --- private methods ----------------------------------------------------------------- */

    /// Parse a TOML file; fields it omits keep their defaults
    fn load_config_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();

        paths::validate_config_file(path)?;

        let contents = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::Config(format!(
                "Failed to read configuration file '{}': {}",
                path.display(),
                e
            ))
        })?;

        self.config = toml::from_str(&contents).map_err(|e| {
            ProxyError::Config(format!(
                "Failed to parse TOML configuration file '{}': {}\n\
                 \n\
                 Run 'chatrelay validate' for more details.",
                path.display(),
                e
            ))
        })?;

        tracing::debug!("Successfully loaded config from: {}", path.display());
        Ok(())
    }

    /// Apply environment variable overrides to current configuration
    fn apply_env_overrides(&mut self) -> Result<()> {
        for (key, value) in &self.env_overrides {
            let value = value.trim();
            match key.as_str() {
                "PORT" => self.config.server.port = parse_env(value, key)?,
                "HOST" => self.config.server.host = value.to_string(),
                "LOG_LEVEL" => self.config.server.log_level = LogLevel::from_str(value)?,
                "BODY_LIMIT_BYTES" => self.config.server.body_limit_bytes = parse_env(value, key)?,

                "OPENAI_BASE_URL" => self.config.upstream.base_url = value.to_string(),
                "OPENAI_API_KEY" => self.config.upstream.api_key = Some(value.to_string()),
                "UPSTREAM_TIMEOUT_SECS" => self.config.upstream.timeout_secs = parse_env(value, key)?,
                "UPSTREAM_CONNECT_TIMEOUT_SECS" => {
                    self.config.upstream.connect_timeout_secs = parse_env(value, key)?
                }

                "CORS_ORIGINS" => self.config.access.cors_origins = parse_list(value),
                "APP_TOKEN" => self.config.access.app_token = Some(value.to_string()),

                "TRUSTED_IP_HEADER" => {
                    self.config.rate_limit.trusted_ip_header = value.to_lowercase()
                }
                "RATE_LIMIT_POINTS" => self.config.rate_limit.points = parse_env(value, key)?,
                "RATE_LIMIT_DURATION" => {
                    self.config.rate_limit.duration_secs = parse_env(value, key)?
                }

                "DEFAULT_MODEL" => self.config.defaults.model = value.to_string(),
                "MAX_TOKENS" => self.config.defaults.max_tokens = parse_env(value, key)?,
                "TEMPERATURE" => self.config.defaults.temperature = parse_env(value, key)?,
                "DEFAULT_STREAM" => self.config.defaults.stream = parse_bool_env(value, key)?,

                "STREAM_FALLBACK" => {
                    self.config.streaming.fallback = StreamFallback::from_str(value)?
                }
                "STREAM_CHANNEL_CAPACITY" => {
                    self.config.streaming.channel_capacity = parse_env(value, key)?
                }

                _ => {
                    tracing::debug!("Ignoring unknown environment variable: {}", key);
                }
            }
        }

        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/* --- utility functions ------------------------------------------------------------------- */

/// Parse a numeric environment value, naming the variable on failure
fn parse_env<T>(value: &str, var_name: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| {
        ProxyError::Config(format!("Invalid {} value '{}': {}", var_name, value, e))
    })
}

/// Parse boolean value from environment variable
fn parse_bool_env(value: &str, var_name: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" | "enabled" => Ok(true),
        "false" | "no" | "0" | "off" | "disabled" => Ok(false),
        _ => Err(ProxyError::Config(format!(
            "Invalid boolean value for {}: '{}'\n\
             Valid values: true/false, yes/no, 1/0, on/off, enabled/disabled",
            var_name, value
        ))),
    }
}

/// Split a comma-separated list, dropping blanks
fn parse_list(value: &str) -> Vec<String> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

/* --- tests ------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Every variable the loader reads, cleared, so the host environment cannot leak in
    fn cleared_env() -> Vec<(&'static str, Option<&'static str>)> {
        ENV_KEYS.iter().map(|key| (*key, None)).collect()
    }

    fn with_env(overrides: &[(&'static str, &'static str)], f: impl FnOnce()) {
        let mut vars = cleared_env();
        for &(key, value) in overrides {
            vars.retain(|(k, _)| *k != key);
            vars.push((key, Some(value)));
        }
        temp_env::with_vars(vars, f);
    }

    #[test]
    fn test_config_loader_defaults() {
        let config = ConfigLoader::new().with_defaults().build().expect("Should build with defaults");

        assert_eq!(config.server.port, 3000);
        assert!(matches!(config.server.log_level, LogLevel::Info));
        assert_eq!(config.rate_limit.points, 120);
        assert_eq!(config.upstream.base_url, "https://api.openai.com");
    }

    #[test]
    fn test_build_requires_defaults() {
        let result = ConfigLoader::new().build();
        assert!(result.is_err());
    }

    #[test]
    fn test_config_loader_with_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("config.toml");

        let config_content = r#"
[server]
port = 8080
log_level = "debug"

[access]
cors_origins = ["https://app.example.com"]
app_token = "s3cr3t"

[streaming]
fallback = "passthrough"
"#;
        fs::write(&config_file, config_content).unwrap();

        with_env(&[], || {
            let config = ConfigLoader::new()
                .with_defaults()
                .with_config_file(&config_file)
                .expect("Should load file")
                .with_env_vars()
                .expect("Should apply env vars")
                .build()
                .expect("Should build");

            assert_eq!(config.server.port, 8080);
            assert!(matches!(config.server.log_level, LogLevel::Debug));
            assert_eq!(config.access.app_token.as_deref(), Some("s3cr3t"));
            assert_eq!(config.streaming.fallback, StreamFallback::Passthrough);
            // untouched sections keep their defaults
            assert_eq!(config.defaults.max_tokens, 512);
        });
    }

    #[test]
    fn test_env_var_overrides() {
        with_env(
            &[
                ("PORT", "9090"),
                ("LOG_LEVEL", "error"),
                ("OPENAI_API_KEY", "sk-test"),
                ("CORS_ORIGINS", " https://a.example.com , ,https://b.example.com"),
                ("RATE_LIMIT_POINTS", "60"),
                ("RATE_LIMIT_DURATION", "30"),
                ("MAX_TOKENS", "256"),
                ("TEMPERATURE", "0.2"),
                ("DEFAULT_STREAM", "false"),
                ("STREAM_FALLBACK", "passthrough"),
            ],
            || {
                let config = ConfigLoader::new()
                    .with_defaults()
                    .with_env_vars()
                    .expect("Should apply env vars")
                    .build()
                    .expect("Should build with env vars");

                assert_eq!(config.server.port, 9090);
                assert!(matches!(config.server.log_level, LogLevel::Error));
                assert_eq!(config.upstream.api_key.as_deref(), Some("sk-test"));
                assert_eq!(
                    config.access.cors_origins,
                    vec!["https://a.example.com".to_string(), "https://b.example.com".to_string()]
                );
                assert_eq!(config.rate_limit.points, 60);
                assert_eq!(config.rate_limit.duration_secs, 30);
                assert_eq!(config.defaults.max_tokens, 256);
                assert!((config.defaults.temperature - 0.2).abs() < f64::EPSILON);
                assert!(!config.defaults.stream);
                assert_eq!(config.streaming.fallback, StreamFallback::Passthrough);
            },
        );
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        with_env(&[("APP_TOKEN", ""), ("PORT", "  ")], || {
            let config = ConfigLoader::new().with_defaults().with_env_vars().unwrap().build().unwrap();
            assert_eq!(config.access.app_token, None);
            assert_eq!(config.server.port, 3000);
        });
    }

    #[test]
    fn test_precedence_order() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("config.toml");
        fs::write(&config_file, "[server]\nport = 7070\n\n[rate_limit]\npoints = 10\n").unwrap();

        with_env(&[("PORT", "8080")], || {
            let config = ConfigLoader::new()
                .with_defaults()
                .with_config_file(&config_file)
                .expect("Should create loader")
                .with_env_vars()
                .expect("Should apply env vars")
                .build()
                .expect("Should build with precedence");

            // env wins over file, file wins over defaults
            assert_eq!(config.server.port, 8080);
            assert_eq!(config.rate_limit.points, 10);
        });
    }

    #[test]
    fn test_invalid_toml_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("config.toml");
        fs::write(&config_file, "[server\nport = 8080\n").unwrap();

        let result = ConfigLoader::new()
            .with_defaults()
            .with_config_file(&config_file)
            .and_then(|loader| loader.build());

        assert!(result.is_err());
        let error_msg = format!("{}", result.unwrap_err());
        assert!(error_msg.contains("Failed to parse TOML"));
    }

    #[test]
    fn test_invalid_numeric_env_names_variable() {
        with_env(&[("RATE_LIMIT_POINTS", "lots")], || {
            let result = ConfigLoader::new().with_defaults().with_env_vars();
            let error_msg = format!("{}", result.err().expect("should fail"));
            assert!(error_msg.contains("RATE_LIMIT_POINTS"));
        });
    }

    #[test]
    fn test_zero_points_fails_build() {
        with_env(&[("RATE_LIMIT_POINTS", "0")], || {
            let result = ConfigLoader::new().with_defaults().with_env_vars().unwrap().build();
            assert!(result.is_err());
        });
    }

    #[test]
    fn test_boolean_env_parsing() {
        assert!(parse_bool_env("true", "TEST").unwrap());
        assert!(parse_bool_env("yes", "TEST").unwrap());
        assert!(parse_bool_env("1", "TEST").unwrap());
        assert!(parse_bool_env("on", "TEST").unwrap());

        assert!(!parse_bool_env("false", "TEST").unwrap());
        assert!(!parse_bool_env("no", "TEST").unwrap());
        assert!(!parse_bool_env("0", "TEST").unwrap());
        assert!(!parse_bool_env("off", "TEST").unwrap());

        assert!(parse_bool_env("invalid", "TEST").is_err());
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list("a, b,,c "), vec!["a", "b", "c"]);
        assert!(parse_list(" , ").is_empty());
    }
}
