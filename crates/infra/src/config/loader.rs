//! Configuration loader
//!
//! Loads application configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If the required variables are missing, falls back to loading from file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! Required:
//! - `PACER_CLIENT_ID`: OAuth client id
//! - `PACER_CLIENT_SECRET`: OAuth client secret
//!
//! Optional overrides (defaults apply when unset):
//! - `PACER_DB_PATH`: Database file path
//! - `PACER_DB_POOL_SIZE`: Connection pool size
//! - `PACER_FEED_BASE_URL`: Remote feed base URL
//! - `PACER_TOKEN_URL`: OAuth token endpoint
//! - `PACER_SYNC_INTERVAL`: Background sync interval in seconds
//! - `PACER_SYNC_ENABLED`: Whether background sync runs (true/false)

use std::path::{Path, PathBuf};

use pacer_domain::{Config, PacerError, Result};

/// Load configuration with automatic fallback strategy
///
/// First attempts to load from environment variables. If the required
/// variables are missing, falls back to loading from a config file.
///
/// # Errors
/// Returns `PacerError::Config` if configuration cannot be loaded from
/// either source, or the file format is invalid.
pub fn load() -> Result<Config> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables
///
/// The OAuth client credentials are required; every other variable is an
/// override on top of the defaults.
///
/// # Errors
/// Returns `PacerError::Config` if required variables are missing or an
/// override has an invalid value.
pub fn load_from_env() -> Result<Config> {
    let mut config = Config::default();

    config.feed.client_id = env_var("PACER_CLIENT_ID")?;
    config.feed.client_secret = env_var("PACER_CLIENT_SECRET")?;

    if let Ok(path) = std::env::var("PACER_DB_PATH") {
        config.database.path = path;
    }
    if let Some(size) = env_parsed::<u32>("PACER_DB_POOL_SIZE")? {
        config.database.pool_size = size;
    }
    if let Ok(url) = std::env::var("PACER_FEED_BASE_URL") {
        config.feed.base_url = url;
    }
    if let Ok(url) = std::env::var("PACER_TOKEN_URL") {
        config.feed.token_url = url;
    }
    if let Some(interval) = env_parsed::<u64>("PACER_SYNC_INTERVAL")? {
        config.scheduler.interval_seconds = interval;
    }
    config.scheduler.enabled = env_bool("PACER_SYNC_ENABLED", config.scheduler.enabled);

    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
///
/// # Errors
/// Returns `PacerError::Config` if the file is missing, no candidate file
/// exists, or parsing fails.
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(PacerError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            PacerError::Config("No config file found in any of the standard locations".to_string())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| PacerError::Config(format!("Failed to read config file: {}", e)))?;

    parse_config(&contents, &config_path)
}

/// Parse configuration from string content; format detected by extension.
fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| PacerError::Config(format!("Invalid TOML format: {}", e))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| PacerError::Config(format!("Invalid JSON format: {}", e))),
        _ => Err(PacerError::Config(format!("Unsupported config format: {}", extension))),
    }
}

/// Probe multiple paths for configuration files
///
/// Searches the current working directory, up to two parent levels, and
/// the executable's directory for `config.{json,toml}` and
/// `pacer.{json,toml}`. Returns the first file that exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        candidates.extend(vec![
            cwd.join("config.json"),
            cwd.join("config.toml"),
            cwd.join("pacer.json"),
            cwd.join("pacer.toml"),
            cwd.join("../config.json"),
            cwd.join("../config.toml"),
            cwd.join("../../config.json"),
            cwd.join("../../config.toml"),
        ]);
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            candidates.extend(vec![
                exe_dir.join("config.json"),
                exe_dir.join("config.toml"),
                exe_dir.join("pacer.json"),
                exe_dir.join("pacer.toml"),
            ]);
        }
    }

    candidates.into_iter().find(|path| path.exists())
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key)
        .map_err(|_| PacerError::Config(format!("Missing required environment variable: {}", key)))
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| PacerError::Config(format!("Invalid value for {}: {}", key, e))),
        Err(_) => Ok(None),
    }
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
