//! Background sync scheduler.
//!
//! Runs incremental syncs for every connected athlete on a fixed interval,
//! pacing athletes apart within a tick and standing down entirely when the
//! shared rate-limit budget runs low. Manual syncs always win the contest
//! for quota: the background pass uses a conservative page cap and aborts
//! its tick before the short window is drained.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use pacer_core::{SyncOptions, SyncService, TokenProvider};
use pacer_domain::config::SchedulerConfig;

use crate::scheduling::error::{SchedulerError, SchedulerResult};

/// Type alias for task handle to avoid complexity warnings
type TaskHandle = Arc<Mutex<Option<JoinHandle<()>>>>;

/// Configuration for the background sync scheduler
#[derive(Debug, Clone)]
pub struct SyncSchedulerConfig {
    /// Interval between ticks
    pub interval: Duration,
    /// Pause between athletes within one tick
    pub user_delay: Duration,
    /// Page cap per athlete per tick (kept below the manual default)
    pub max_pages: u32,
    /// Records per page
    pub page_size: u32,
    /// Skip or abort a tick when short-window remaining drops below this
    pub min_short_remaining: usize,
}

impl Default for SyncSchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600), // 60 minutes
            user_delay: Duration::from_secs(10),
            max_pages: 3,
            page_size: 30,
            min_short_remaining: 5,
        }
    }
}

impl SyncSchedulerConfig {
    pub fn from_config(config: &SchedulerConfig, page_size: u32) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_seconds),
            user_delay: Duration::from_secs(config.user_delay_seconds),
            max_pages: config.max_pages,
            page_size,
            min_short_remaining: config.min_short_remaining,
        }
    }
}

/// Periodic background sync over all connected athletes
pub struct SyncScheduler {
    service: Arc<SyncService>,
    tokens: Arc<dyn TokenProvider>,
    config: SyncSchedulerConfig,
    cancellation_token: CancellationToken,
    task_handle: TaskHandle,
}

impl SyncScheduler {
    pub fn new(
        service: Arc<SyncService>,
        tokens: Arc<dyn TokenProvider>,
        config: SyncSchedulerConfig,
    ) -> Self {
        Self {
            service,
            tokens,
            config,
            cancellation_token: CancellationToken::new(),
            task_handle: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the scheduler
    ///
    /// Spawns a background task that runs one sync pass per interval. The
    /// first pass happens one full interval after start, not immediately.
    ///
    /// # Errors
    ///
    /// Returns error if scheduler is already running
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> SchedulerResult<()> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }

        info!(interval_secs = self.config.interval.as_secs(), "Starting sync scheduler");

        // Create a new cancellation token (supports restart after stop)
        self.cancellation_token = CancellationToken::new();

        let service = Arc::clone(&self.service);
        let tokens = Arc::clone(&self.tokens);
        let config = self.config.clone();
        let cancel = self.cancellation_token.clone();

        let handle = tokio::spawn(async move {
            Self::sync_loop(service, tokens, config, cancel).await;
        });

        *self.task_handle.lock().await = Some(handle);

        info!("Sync scheduler started");
        Ok(())
    }

    /// Stop the scheduler gracefully
    ///
    /// Cancels the background task and awaits completion.
    ///
    /// # Errors
    ///
    /// Returns error if scheduler is not running
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> SchedulerResult<()> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        info!("Stopping sync scheduler");

        self.cancellation_token.cancel();

        if let Some(handle) = self.task_handle.lock().await.take() {
            let join_timeout = Duration::from_secs(5);
            tokio::time::timeout(join_timeout, handle)
                .await
                .map_err(|_| SchedulerError::StopTimeout { seconds: join_timeout.as_secs() })?
                .map_err(|e| SchedulerError::TaskJoinFailed(e.to_string()))?;
        }

        info!("Sync scheduler stopped");
        Ok(())
    }

    /// Check if scheduler is running
    ///
    /// A scheduler is considered running if it has an active task handle that
    /// hasn't finished.
    pub fn is_running(&self) -> bool {
        self.task_handle
            .try_lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Background sync loop
    async fn sync_loop(
        service: Arc<SyncService>,
        tokens: Arc<dyn TokenProvider>,
        config: SyncSchedulerConfig,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Sync loop cancelled");
                    break;
                }
                _ = tokio::time::sleep(config.interval) => {
                    Self::run_tick(&service, &tokens, &config, &cancel).await;
                }
            }
        }
    }

    /// One sync pass over all connected athletes
    async fn run_tick(
        service: &Arc<SyncService>,
        tokens: &Arc<dyn TokenProvider>,
        config: &SyncSchedulerConfig,
        cancel: &CancellationToken,
    ) {
        let athletes = match tokens.connected_athletes().await {
            Ok(athletes) => athletes,
            Err(e) => {
                error!(error = %e, "Failed to enumerate connected athletes");
                return;
            }
        };

        if athletes.is_empty() {
            debug!("No connected athletes, skipping tick");
            return;
        }

        info!(athletes = athletes.len(), "Background sync tick starting");

        let options = SyncOptions {
            incremental: true,
            page_size: config.page_size,
            max_pages: config.max_pages,
        };

        let total = athletes.len();
        for (index, athlete_id) in athletes.into_iter().enumerate() {
            if cancel.is_cancelled() {
                debug!("Tick cancelled mid-pass");
                return;
            }

            // Leave headroom for manual syncs; the rest of the pass waits
            // for the next tick.
            let remaining = service.rate_limit_status().short_remaining;
            if remaining < config.min_short_remaining {
                warn!(remaining, threshold = config.min_short_remaining,
                      "Rate-limit headroom too low, aborting tick");
                return;
            }

            match service.sync(athlete_id, options).await {
                Ok(report) => {
                    info!(
                        athlete_id,
                        synced = report.synced,
                        new = report.new_count,
                        pages = report.pages_fetched,
                        outcome = ?report.outcome,
                        "Background sync finished for athlete"
                    );
                }
                Err(e) => {
                    // One athlete's failure never aborts the pass
                    error!(athlete_id, error = %e, "Background sync failed for athlete");
                }
            }

            if index + 1 < total {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Tick cancelled during pacing delay");
                        return;
                    }
                    _ = tokio::time::sleep(config.user_delay) => {}
                }
            }
        }

        info!("Background sync tick complete");
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        // Last-resort cleanup; the task observes the token and exits
        self.cancellation_token.cancel();
    }
}
