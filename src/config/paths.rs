//!
//! Config file location for chatrelay.
//!
//! An explicit `CHATRELAY_CONFIG` path wins; otherwise the platform user
//! config directory is consulted (`~/.config/chatrelay/config.toml` on Linux,
//! `~/Library/Application Support/...` on macOS, `%APPDATA%` on Windows).
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use crate::error::{ProxyError, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/* --- constants ------------------------------------------------------------------------------- */

const APP_NAME: &str = "chatrelay";
const ORGANIZATION: &str = "com";
const ORG_NAME: &str = "SkyCorp";

/** Environment variable naming an explicit config file */
pub const CONFIG_PATH_ENV: &str = "CHATRELAY_CONFIG";

/* --- public functions ------------------------------------------------------------------------ */

/// Path of the per-user config file. The file may not exist.
pub fn user_config_file() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from(ORGANIZATION, ORG_NAME, APP_NAME).ok_or_else(|| {
        ProxyError::Config(
            "Unable to determine user directories. Set CHATRELAY_CONFIG to point at a config \
             file instead."
                .to_string(),
        )
    })?;

    Ok(project_dirs.config_dir().join("config.toml"))
}

/// Config file named by `CHATRELAY_CONFIG`, expanded, if the variable is set and non-empty
pub fn explicit_config_file() -> Result<Option<PathBuf>> {
    match std::env::var(CONFIG_PATH_ENV) {
        Ok(value) if !value.trim().is_empty() => expand_path(value.trim()).map(Some),
        _ => Ok(None),
    }
}

/// Expand `~` and `$VAR` references in a path
pub fn expand_path<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
    let path_str = path.as_ref().to_string_lossy();

    let expanded = shellexpand::full(&path_str).map_err(|e| {
        ProxyError::Config(format!(
            "Failed to expand environment variables in path '{}': {}",
            path_str, e
        ))
    })?;

    Ok(PathBuf::from(expanded.as_ref()))
}

/// Check that a config file exists, is a regular file and can be opened
pub fn validate_config_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(ProxyError::Config(format!(
            "Configuration file '{}' does not exist",
            path.display()
        )));
    }

    if !path.is_file() {
        return Err(ProxyError::Config(format!(
            "Configuration path '{}' exists but is not a regular file",
            path.display()
        )));
    }

    std::fs::File::open(path).map_err(|e| {
        ProxyError::Config(format!(
            "Configuration file '{}' exists but cannot be read: {}\n\
             You can fix this with: chmod 644 '{}'",
            path.display(),
            e,
            path.display()
        ))
    })?;

    Ok(())
}

/* --- tests ----------------------------------------------------------------------------------- */
