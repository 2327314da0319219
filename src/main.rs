//! # chatrelay - chat completion proxy server
//!
//! Serves a browser front end without exposing the upstream API key.
//!
//! ## Features
//!
//! - **Shared secret**: optional `x-app-token` check
//! - **CORS allowlist**: unlisted browser origins get 403, preflights included
//! - **Rate limiting**: per-client token buckets keyed by the edge proxy address
//! - **Streaming relay**: SSE chunks copied as they arrive, with a JSON fallback
//! - **Configurable Logging**: `LOG_LEVEL`, or `RUST_LOG` for per-module filters
//!
//! ## Configuration
//!
//! ```bash
//! # Required for /chat to work
//! export OPENAI_API_KEY="sk-..."
//!
//! # Optional
//! export OPENAI_BASE_URL=https://api.openai.com
//! export PORT=3000
//! export APP_TOKEN=s3cr3t
//! export CORS_ORIGINS=https://app.example.com
//! export RATE_LIMIT_POINTS=120
//! export RATE_LIMIT_DURATION=60
//! ```
//!
//! ## API Usage
//!
//! ```bash
//! curl -X POST http://localhost:3000/chat \
//!   -H "Content-Type: application/json" \
//!   -d '{"messages": [{"role": "user", "content": "Hello!"}], "stream": false}'
//! ```
//!
//! Authors: Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp
//!

/* --- uses ------------------------------------------------------------------------------------ */

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chatrelay::config::paths;
use chatrelay::config::{Config, ValidationIssue, ValidationSeverity};
use chatrelay::error::{ProxyError, Result};
use chatrelay::server::AppState;

/* --- constants ------------------------------------------------------------------------------ */

/** the version as defined in cargo.toml */
const VERSION: &str = env!("CARGO_PKG_VERSION");

/** Environment variables reported by `chatrelay doctor` */
const DOCTOR_VARS: &[&str] = &[
    "OPENAI_API_KEY",
    "OPENAI_BASE_URL",
    "PORT",
    "APP_TOKEN",
    "CORS_ORIGINS",
    "RATE_LIMIT_POINTS",
    "RATE_LIMIT_DURATION",
    "STREAM_FALLBACK",
];

/** Variables whose values are never printed */
const SECRET_VARS: &[&str] = &["OPENAI_API_KEY", "APP_TOKEN"];

/* --- start of code -------------------------------------------------------------------------- */

///
/// Main application entry point for the chatrelay proxy server.
///
/// Handles CLI commands, loads configuration, initializes logging and
/// serves until interrupted.
#[tokio::main]
async fn main() {
    // Handle CLI arguments before config loading
    handle_cli_args();

    if let Err(e) = run().await {
        let error_msg = format!("{}", e);
        eprintln!("Error:");
        for line in error_msg.lines() {
            eprintln!("{}", line);
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = initialize_config()?;
    initialize_logging(&config);

    let app_state = Arc::new(AppState::new(config.clone())?);
    let app = chatrelay::build_router(app_state.clone())?;

    start_server(&config, app).await?;
    app_state.metrics.log_summary();
    Ok(())
}

///
/// Handle command line arguments like --version and --help before config loading.
///
/// This ensures these commands work even without proper configuration.
fn handle_cli_args() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        return;
    }

    match args[1].as_str() {
        "--version" | "-V" => {
            println!("chatrelay {}", VERSION);
            std::process::exit(0);
        }
        "--help" | "-h" => {
            print_help();
            std::process::exit(0);
        }
        "doctor" => {
            run_doctor();
            std::process::exit(0);
        }
        "validate" => {
            let exit_code = run_validate();
            std::process::exit(exit_code);
        }
        "example-config" => {
            print!("{}", Config::example_toml());
            std::process::exit(0);
        }
        other => {
            if other.starts_with('-') {
                eprintln!("Error: Unknown option: {}", other);
                eprintln!();
                print_help();
            } else {
                eprintln!("Error: Unknown command: {}", other);
                eprintln!();
                eprintln!("Run 'chatrelay --help' for more information.");
            }
            std::process::exit(1);
        }
    }
}

///
/// Print help information for the chatrelay CLI.
fn print_help() {
    println!("chatrelay v{}", VERSION);
    println!("Proxy forwarding browser chat requests to an OpenAI-compatible API");
    println!();
    println!("USAGE:");
    println!("    chatrelay [COMMAND] [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    doctor              Check configuration and print every finding");
    println!("    validate            Validate configuration and exit");
    println!("    example-config      Print an example config.toml");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help          Print help information");
    println!("    -V, --version       Print version information");
    println!();
    println!("ENVIRONMENT VARIABLES:");
    println!("    OPENAI_API_KEY             Upstream bearer key (required for /chat)");
    println!("    OPENAI_BASE_URL            Upstream base URL (default: https://api.openai.com)");
    println!("    PORT, HOST                 Bind address (default: 0.0.0.0:3000)");
    println!("    LOG_LEVEL                  trace, debug, info, warn, error (default: info)");
    println!("    APP_TOKEN                  Shared secret expected in x-app-token (default: unset)");
    println!("    CORS_ORIGINS               Comma-separated origin allowlist (default: *)");
    println!("    RATE_LIMIT_POINTS          Requests per window and client (default: 120)");
    println!("    RATE_LIMIT_DURATION        Window length in seconds (default: 60)");
    println!("    TRUSTED_IP_HEADER          Client address header (default: cf-connecting-ip)");
    println!("    DEFAULT_MODEL, MAX_TOKENS, TEMPERATURE, DEFAULT_STREAM");
    println!("                               Defaults for omitted request fields");
    println!("    STREAM_FALLBACK            retry or passthrough (default: retry)");
    println!("    {:<26} Path of a TOML config file", paths::CONFIG_PATH_ENV);
    println!();
    println!("EXAMPLES:");
    println!("    chatrelay                   Start the proxy server");
    println!("    chatrelay doctor            Check configuration");
    println!("    chatrelay validate          Validate and exit");
}

///
/// Run the doctor command to check configuration.
///
/// Prints the config file in use, the relevant variables (secrets masked) and
/// every validation finding.
fn run_doctor() {
    let _ = dotenvy::dotenv();

    println!("chatrelay doctor - Configuration Health Check");
    println!("{}", "=".repeat(60));
    println!();

    if std::path::Path::new(".env").exists() {
        println!("[OK] Found .env file");
    } else {
        println!("[INFO] No .env file found (using environment variables)");
    }

    match paths::explicit_config_file() {
        Ok(Some(path)) => match paths::validate_config_file(&path) {
            Ok(()) => println!("[OK] Config file: {}", path.display()),
            Err(e) => println!("[ERROR] {}", e),
        },
        Ok(None) => match paths::user_config_file() {
            Ok(path) if path.exists() => println!("[OK] Config file: {}", path.display()),
            Ok(path) => println!("[INFO] No config file at {} (using defaults)", path.display()),
            Err(e) => println!("[WARNING] {}", e),
        },
        Err(e) => println!("[ERROR] {}", e),
    }
    println!();

    println!("Environment:");
    for var in DOCTOR_VARS {
        match env::var(var) {
            Ok(val) if val.trim().is_empty() => println!("  [INFO] {}: set but empty", var),
            Ok(val) if SECRET_VARS.contains(var) => {
                println!("  [OK] {}: set ({} chars)", var, val.len())
            }
            Ok(val) => println!("  [OK] {}: {}", var, val),
            Err(_) => println!("  [INFO] {}: not set", var),
        }
    }
    println!();

    println!("Configuration Validation:");
    match load_unvalidated() {
        Ok(config) => {
            let issues = config.validate();
            if issues.is_empty() {
                println!("  [OK] No validation issues found");
                println!();
                println!("[SUCCESS] Configuration looks good! You're ready to run chatrelay.");
                return;
            }

            print_issues("[ERROR]", "error(s)", &issues, ValidationSeverity::Error);
            print_issues("[WARNING]", "warning(s)", &issues, ValidationSeverity::Warning);
            print_issues("[INFO]", "info message(s)", &issues, ValidationSeverity::Info);

            if issues.iter().any(|i| i.severity == ValidationSeverity::Error) {
                println!("[ERROR] Configuration has errors. Please fix them before running chatrelay.");
            } else {
                println!(
                    "[SUCCESS] Configuration has warnings but should work. Review suggestions above."
                );
            }
        }
        Err(e) => {
            println!("  [ERROR] Failed to load configuration:");
            println!("     {}", e);
        }
    }
}

fn print_issues(label: &str, noun: &str, issues: &[ValidationIssue], severity: ValidationSeverity) {
    let selected: Vec<_> = issues.iter().filter(|i| i.severity == severity).collect();
    if selected.is_empty() {
        return;
    }

    println!("  {} Found {} {}:", label, selected.len(), noun);
    for issue in selected {
        println!("     - {}: {}", issue.field, issue.message);
        if let Some(suggestion) = &issue.suggestion {
            println!("       [TIP] {}", suggestion);
        }
    }
    println!();
}

///
/// Run the validate command to validate configuration and exit.
///
/// Returns exit code 0 if valid, 1 if invalid.
fn run_validate() -> i32 {
    let _ = dotenvy::dotenv();

    match load_unvalidated() {
        Ok(config) => {
            let issues = config.validate();
            let errors: Vec<_> =
                issues.iter().filter(|i| i.severity == ValidationSeverity::Error).collect();

            if errors.is_empty() {
                println!("[OK] Configuration is valid");
                0
            } else {
                eprintln!("[ERROR] Configuration validation failed:");
                for issue in &errors {
                    eprintln!("  - {}: {}", issue.field, issue.message);
                    if let Some(suggestion) = &issue.suggestion {
                        eprintln!("    Suggestion: {}", suggestion);
                    }
                }
                1
            }
        }
        Err(e) => {
            eprintln!("[ERROR] {}", e);
            1
        }
    }
}

/// Load every layer without rejecting invalid values, so the commands can
/// report them all
fn load_unvalidated() -> Result<Config> {
    let loader = chatrelay::config::loader::ConfigLoader::new().with_defaults();
    let loader = match paths::explicit_config_file()? {
        Some(path) => loader.with_config_file(path)?,
        None => loader.with_user_config()?,
    };
    Ok(loader.with_env_vars()?.into_config())
}

///
/// Initialize configuration from the environment, config file and defaults.
///
/// # Returns
///  * Validated configuration
///  * `ProxyError::Config` if a value cannot be parsed or validation fails
fn initialize_config() -> Result<Config> {
    Config::load()
}

///
/// Initialize logging with the configured level.
///
/// `RUST_LOG`, when set, replaces the configured level.
///
/// # Arguments
///  * `config` - application configuration containing log level settings
fn initialize_logging(config: &Config) {
    let level = config.server.log_level.to_tracing_level();
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));

    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();
}

///
/// Start the HTTP server and log startup information.
///
/// # Arguments
///  * `config` - application configuration
///  * `app` - configured Axum application
///
/// # Returns
///  * `Ok(())` when server shuts down gracefully
///  * `ProxyError::Http` if server binding or startup fails
async fn start_server(config: &Config, app: Router) -> Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        let error_msg = format!("Failed to bind to {}: {}", addr, e);

        if e.kind() == std::io::ErrorKind::AddrInUse {
            ProxyError::Http(format!(
                "{}\n\n\
                 Port {} is already in use. Here are some solutions:\n\n\
                 1. Close the other instance:\n\
                    lsof -i :{}\n\
                 2. Change the port:\n\
                    export PORT={}\n\n\
                 Run 'chatrelay doctor' for more help.",
                error_msg,
                config.server.port,
                config.server.port,
                config.server.port.saturating_add(1)
            ))
        } else {
            ProxyError::Http(format!(
                "{}\n\n\
                 To fix this:\n\
                 - Check that HOST is a local address\n\
                 - Ensure you have permission to bind to the port\n\
                 - Try a different port: export PORT=3001\n\n\
                 Run 'chatrelay doctor' for more help.",
                error_msg
            ))
        }
    })?;

    log_startup_info(config);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ProxyError::Http(format!("Server error: {}", e)))?;

    info!("Server stopped");
    Ok(())
}

/// Resolve on Ctrl+C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}

///
/// Log startup information and configuration details.
///
/// # Arguments
///  * `config` - application configuration
fn log_startup_info(config: &Config) {
    info!("chatrelay v{} listening on {}:{}", VERSION, config.server.host, config.server.port);
    info!("Upstream endpoint: {}", config.upstream.chat_completions_url());
    info!(
        "Rate limit: {} requests per {}s per client (key header: {})",
        config.rate_limit.points, config.rate_limit.duration_secs, config.rate_limit.trusted_ip_header
    );
    info!("Stream fallback: {:?}", config.streaming.fallback);

    if config.cors_restricted() {
        info!("CORS restricted to: {}", config.access.cors_origins.join(", "));
    } else {
        info!("CORS open to any origin");
    }

    if config.access.app_token.as_deref().is_some_and(|t| !t.is_empty()) {
        info!("Shared secret required in x-app-token");
    }

    if !config.has_credential() {
        tracing::warn!("OPENAI_API_KEY is not set: /chat will answer 500 until it is configured");
    }
}
