//! Sync coordinator - core orchestration logic
//!
//! Drives one athlete's sync run: resolves the incremental cursor, walks the
//! paginated feed newest-first through the retry executor under the shared
//! quota tracker, upserts records with per-record failure isolation, and
//! advances the cursor only after a clean run.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use pacer_common::ratelimit::{QuotaStatus, QuotaTracker};
use pacer_common::retry::{CallError, CredentialRefresh, RetryExecutor};
use pacer_domain::{PacerError, Result};
use tracing::{info, instrument, warn};

use super::ports::{ActivityFeed, ActivityStore, TokenProvider};
use super::report::{SyncOptions, SyncOutcome, SyncReport};

/// Flow decision after processing one fetched page
enum PageFlow {
    /// Fetch the next page
    Continue,
    /// Incremental boundary reached; all further pages are older
    StopBoundary,
    /// Empty or short page; the feed is drained
    StopDrained,
}

/// Running counters for one sync invocation
#[derive(Default)]
struct RunTally {
    synced: u32,
    new_count: u32,
    updated_count: u32,
    skipped: u32,
    pages_fetched: u32,
    max_seen: Option<DateTime<Utc>>,
}

/// Per-athlete sync coordinator.
///
/// One instance is shared (behind `Arc`) by the manual-trigger surface and
/// the background scheduler, so both paths flow through the same quota
/// tracker and the same per-athlete in-flight registry.
pub struct SyncService {
    feed: Arc<dyn ActivityFeed>,
    store: Arc<dyn ActivityStore>,
    tokens: Arc<dyn TokenProvider>,
    quota: QuotaTracker,
    executor: RetryExecutor,
    in_flight: Arc<DashMap<i64, ()>>,
}

impl SyncService {
    pub fn new(
        feed: Arc<dyn ActivityFeed>,
        store: Arc<dyn ActivityStore>,
        tokens: Arc<dyn TokenProvider>,
        quota: QuotaTracker,
        executor: RetryExecutor,
    ) -> Self {
        Self { feed, store, tokens, quota, executor, in_flight: Arc::new(DashMap::new()) }
    }

    /// Rate-limit snapshot for the status surface
    pub fn rate_limit_status(&self) -> QuotaStatus {
        self.quota.status()
    }

    /// Run one sync for `athlete_id`.
    ///
    /// Fails fast with `SyncInProgress` when a run for the same athlete is
    /// already in flight, and with `Unauthorized` when no usable credentials
    /// exist. Once pagination starts, failures become part of the returned
    /// report (`SyncOutcome::Aborted`) instead of errors, so partial
    /// progress is never hidden from the caller.
    #[instrument(skip(self), fields(athlete_id = athlete_id))]
    pub async fn sync(&self, athlete_id: i64, options: SyncOptions) -> Result<SyncReport> {
        let _guard = self.claim(athlete_id)?;

        // Fail fast before spending quota; subsequent attempts re-read the
        // token so a mid-run refresh is picked up.
        self.tokens.access_token(athlete_id).await?;

        let since = if options.incremental {
            self.store.last_sync_cursor(athlete_id).await?
        } else {
            None
        };
        if let Some(cursor) = since {
            info!(%cursor, "incremental sync from stored cursor");
        }

        let executor = self.executor.clone().with_refresh(Arc::new(RefreshOnReject {
            tokens: Arc::clone(&self.tokens),
            athlete_id,
        }));

        let mut tally = RunTally::default();
        let mut outcome = SyncOutcome::Completed;

        for page in 1..=options.max_pages {
            // Advisory gate: stop early rather than burn the remaining
            // quota on background pagination.
            if let Err(denied) = self.quota.try_admit() {
                warn!(page, %denied, "quota exhausted, stopping pagination");
                outcome = SyncOutcome::RateLimited {
                    retry_after_secs: denied.retry_after.as_secs(),
                };
                break;
            }

            let description = format!("activities page {page} for athlete {athlete_id}");
            let activities = match executor
                .execute(&description, || self.fetch_once(athlete_id, page, options.page_size))
                .await
            {
                Ok(activities) => activities,
                Err(CallError::QuotaExhausted { retry_after }) => {
                    outcome = SyncOutcome::RateLimited { retry_after_secs: retry_after.as_secs() };
                    break;
                }
                Err(err) => {
                    // Already-upserted records stay committed; the cursor is
                    // left behind so the next run retries this range.
                    outcome = SyncOutcome::Aborted { error: map_call_error(err) };
                    break;
                }
            };

            tally.pages_fetched += 1;

            match self.process_page(athlete_id, &activities, since, options, &mut tally).await {
                PageFlow::Continue => {}
                PageFlow::StopBoundary => {
                    outcome = SyncOutcome::BoundaryReached;
                    break;
                }
                PageFlow::StopDrained => break,
            }
        }

        self.advance_cursor(athlete_id, since, &tally, &outcome).await;

        info!(
            synced = tally.synced,
            new = tally.new_count,
            updated = tally.updated_count,
            skipped = tally.skipped,
            pages = tally.pages_fetched,
            "sync finished"
        );

        Ok(SyncReport {
            synced: tally.synced,
            new_count: tally.new_count,
            updated_count: tally.updated_count,
            skipped: tally.skipped,
            pages_fetched: tally.pages_fetched,
            outcome,
            rate_limit: self.quota.status(),
        })
    }

    /// One physical fetch attempt: atomically consume quota, then call the
    /// feed. Capacity is spent once per real network call, retries included.
    async fn fetch_once(
        &self,
        athlete_id: i64,
        page: u32,
        per_page: u32,
    ) -> std::result::Result<Vec<pacer_domain::ActivitySummary>, CallError> {
        self.quota
            .try_acquire()
            .map_err(|denied| CallError::QuotaExhausted { retry_after: denied.retry_after })?;
        let token = self
            .tokens
            .access_token(athlete_id)
            .await
            .map_err(|err| CallError::Status { code: 401, retry_after: None, message: err.to_string() })?;
        self.feed.fetch_page(&token, page, per_page).await
    }

    /// Upsert one page of records, newest-first, honoring the incremental
    /// boundary and isolating per-record failures.
    async fn process_page(
        &self,
        athlete_id: i64,
        activities: &[pacer_domain::ActivitySummary],
        since: Option<DateTime<Utc>>,
        options: SyncOptions,
        tally: &mut RunTally,
    ) -> PageFlow {
        if activities.is_empty() {
            return PageFlow::StopDrained;
        }

        for activity in activities {
            if options.incremental {
                if let Some(cursor) = since {
                    // Not strictly newer: this record and everything after
                    // it, on this page and all further pages, is already
                    // stored.
                    if activity.start_date <= cursor {
                        return PageFlow::StopBoundary;
                    }
                }
            }

            tally.synced += 1;
            match self.store.upsert(athlete_id, activity).await {
                Ok(outcome) => {
                    if outcome.was_new {
                        tally.new_count += 1;
                    } else {
                        tally.updated_count += 1;
                    }
                    // Only successfully persisted records may move the
                    // cursor; a skipped record must stay ahead of it.
                    if tally.max_seen.map_or(true, |seen| activity.start_date > seen) {
                        tally.max_seen = Some(activity.start_date);
                    }
                }
                Err(err) => {
                    warn!(activity_id = activity.id, error = %err, "upsert failed, skipping record");
                    tally.skipped += 1;
                }
            }
        }

        if (activities.len() as u32) < options.page_size {
            PageFlow::StopDrained
        } else {
            PageFlow::Continue
        }
    }

    /// Advance the cursor to the newest start time observed, only after a
    /// clean run and only forward.
    async fn advance_cursor(
        &self,
        athlete_id: i64,
        since: Option<DateTime<Utc>>,
        tally: &RunTally,
        outcome: &SyncOutcome,
    ) {
        if !outcome.is_clean() {
            return;
        }
        let Some(max_seen) = tally.max_seen else { return };
        if since.is_some_and(|cursor| max_seen <= cursor) {
            return;
        }
        if let Err(err) = self.store.set_last_sync_cursor(athlete_id, max_seen).await {
            // The run itself succeeded; a stale cursor only means the next
            // run re-fetches a little and upserts idempotently.
            warn!(error = %err, "failed to persist sync cursor");
        }
    }

    fn claim(&self, athlete_id: i64) -> Result<FlightGuard> {
        use dashmap::mapref::entry::Entry;
        match self.in_flight.entry(athlete_id) {
            Entry::Occupied(_) => Err(PacerError::SyncInProgress(athlete_id)),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(FlightGuard { registry: Arc::clone(&self.in_flight), athlete_id })
            }
        }
    }
}

/// Releases the per-athlete in-flight claim on every exit path
struct FlightGuard {
    registry: Arc<DashMap<i64, ()>>,
    athlete_id: i64,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.athlete_id);
    }
}

/// 401 hook: force a token refresh so the next attempt's token re-read
/// picks up the renewed credential.
struct RefreshOnReject {
    tokens: Arc<dyn TokenProvider>,
    athlete_id: i64,
}

#[async_trait]
impl CredentialRefresh for RefreshOnReject {
    async fn refresh(&self) -> bool {
        match self.tokens.refresh_token(self.athlete_id).await {
            Ok(_) => true,
            Err(err) => {
                warn!(athlete_id = self.athlete_id, error = %err, "credential refresh failed");
                false
            }
        }
    }
}

fn map_call_error(err: CallError) -> PacerError {
    match err {
        CallError::Network(message) => PacerError::Network(message),
        CallError::Status { code: 401, message, .. } => PacerError::Unauthorized(message),
        CallError::Status { code, message, .. } if code == 429 || code >= 500 => {
            PacerError::Upstream(format!("status {code}: {message}"))
        }
        CallError::Status { code, message, .. } => {
            PacerError::Rejected(format!("status {code}: {message}"))
        }
        CallError::QuotaExhausted { retry_after } => {
            PacerError::RateLimited(format!("retry in {}s", retry_after.as_secs()))
        }
    }
}
