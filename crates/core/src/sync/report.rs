//! Sync invocation options and the per-run summary

use pacer_common::ratelimit::QuotaStatus;
use pacer_domain::PacerError;
use serde::{Deserialize, Serialize};

/// Options for one sync invocation
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Only fetch records strictly newer than the stored cursor
    pub incremental: bool,
    /// Records per page
    pub page_size: u32,
    /// Cap on pages fetched this invocation (a cost bound, not an error)
    pub max_pages: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self { incremental: true, page_size: 30, max_pages: 10 }
    }
}

/// How a sync run ended.
///
/// Every terminal state is data, not an exception: "nothing synced" and
/// "some synced, then stopped" are both valid outcomes the caller can
/// distinguish.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Pagination ran to a natural end (empty/short page or page cap)
    Completed,
    /// Incremental boundary hit: everything further back is already stored
    BoundaryReached,
    /// Local quota denial stopped pagination early (a policy outcome)
    RateLimited { retry_after_secs: u64 },
    /// Terminal failure after partial progress; committed records remain,
    /// the cursor is untouched so the next run retries the unfinished range
    Aborted { error: PacerError },
}

impl SyncOutcome {
    /// `true` when the run ended without a fatal error
    pub fn is_clean(&self) -> bool {
        !matches!(self, Self::Aborted { .. })
    }
}

/// Immutable summary of one sync invocation
#[derive(Debug, Serialize, Deserialize)]
pub struct SyncReport {
    /// Records seen (upsert attempted) this run
    pub synced: u32,
    /// Records with no prior row
    pub new_count: u32,
    /// Records that replaced an existing row
    pub updated_count: u32,
    /// Records whose upsert failed and was skipped
    pub skipped: u32,
    pub pages_fetched: u32,
    pub outcome: SyncOutcome,
    /// Rate-limit snapshot at completion
    pub rate_limit: QuotaStatus,
}
