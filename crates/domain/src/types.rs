//! Common data types used throughout the application

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One activity record from the remote feed.
///
/// The remote service assigns the immutable `id`; the sync engine treats the
/// record as opaque except for `id` (idempotency key) and `start_date` (the
/// incremental boundary). The full upstream payload is carried in `raw` so
/// downstream analysis never loses fields this summary does not model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivitySummary {
    pub id: i64,
    pub sport_type: Option<String>,
    #[serde(rename = "type")]
    pub activity_type: Option<String>,
    pub start_date: DateTime<Utc>,
    pub distance: Option<f64>,
    pub moving_time: Option<i64>,
    pub elapsed_time: Option<i64>,
    pub average_heartrate: Option<f64>,
    pub max_heartrate: Option<f64>,
    pub total_elevation_gain: Option<f64>,
    /// Full upstream JSON payload, attached by the feed adapter.
    #[serde(skip)]
    pub raw: serde_json::Value,
}

/// Result of a single upsert against the activity store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UpsertOutcome {
    /// `true` when no prior row existed for the record's id.
    pub was_new: bool,
}
