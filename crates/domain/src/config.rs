//! Configuration structures
//!
//! The full configuration tree for the sync engine. Everything except the
//! feed credentials carries a sensible default so a minimal deployment only
//! needs `client_id`/`client_secret` and a database path.

use serde::{Deserialize, Serialize};

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// SQLite database settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "pacer.db".to_string(), pool_size: 4 }
    }
}

/// Remote activity feed settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Base URL of the remote API (e.g. "https://www.strava.com/api/v3")
    pub base_url: String,
    /// OAuth token endpoint used for refresh grants
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// Records per page for manual sync
    pub page_size: u32,
    /// Page cap for a single manual sync invocation
    pub max_pages: u32,
    /// Transport-level timeout for one request, in seconds
    pub request_timeout_seconds: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.strava.com/api/v3".to_string(),
            token_url: "https://www.strava.com/oauth/token".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            page_size: 30,
            max_pages: 10,
            request_timeout_seconds: 30,
        }
    }
}

/// Sliding-window quota limits for the remote API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub short_limit: usize,
    pub short_window_seconds: u64,
    pub long_limit: usize,
    pub long_window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        // Strava-style quotas: 200 calls / 15 min, 2000 calls / day.
        Self {
            short_limit: 200,
            short_window_seconds: 15 * 60,
            long_limit: 2000,
            long_window_seconds: 24 * 60 * 60,
        }
    }
}

/// Exponential backoff settings for retried remote calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_seconds: f64,
    pub multiplier: f64,
    pub max_backoff_seconds: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 3, initial_backoff_seconds: 1.0, multiplier: 2.0, max_backoff_seconds: 60.0 }
    }
}

/// Background sync loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Seconds between ticks
    pub interval_seconds: u64,
    /// Seconds to pause between athletes within a tick
    pub user_delay_seconds: u64,
    /// Conservative page cap for background sync (below the manual default)
    pub max_pages: u32,
    /// Abort a tick when short-window remaining capacity drops below this
    pub min_short_remaining: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 60 * 60,
            user_delay_seconds: 10,
            max_pages: 3,
            min_short_remaining: 5,
        }
    }
}
