//! Port interfaces for sync operations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pacer_common::retry::CallError;
use pacer_domain::{ActivitySummary, Result, UpsertOutcome};

/// Trait for resolving access credentials per athlete
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return a currently-valid access token, refreshing internally when the
    /// stored one is expired. `Unauthorized` means no usable credentials
    /// exist and the athlete's sync run is over.
    async fn access_token(&self, athlete_id: i64) -> Result<String>;

    /// Force a refresh regardless of apparent validity (the upstream
    /// rejected a token we believed valid). Returns the renewed token.
    async fn refresh_token(&self, athlete_id: i64) -> Result<String>;

    /// Athletes holding credentials, for scheduler enumeration
    async fn connected_athletes(&self) -> Result<Vec<i64>>;
}

/// Trait for the local activity store
#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Insert-if-absent, update-if-present, keyed by the remote-assigned id
    async fn upsert(&self, athlete_id: i64, activity: &ActivitySummary) -> Result<UpsertOutcome>;

    /// High-water-mark start time of the most recently observed activity
    async fn last_sync_cursor(&self, athlete_id: i64) -> Result<Option<DateTime<Utc>>>;

    /// Persist an advanced cursor
    async fn set_last_sync_cursor(&self, athlete_id: i64, cursor: DateTime<Utc>) -> Result<()>;
}

/// Trait for the remote paginated activity feed
///
/// One call is one physical attempt; retry lives with the caller. Pages are
/// 1-based and records arrive ordered newest-first.
#[async_trait]
pub trait ActivityFeed: Send + Sync {
    async fn fetch_page(
        &self,
        token: &str,
        page: u32,
        per_page: u32,
    ) -> std::result::Result<Vec<ActivitySummary>, CallError>;
}
