//! Sliding-window quota tracking for remote API calls
//!
//! Tracks call timestamps in two rolling windows (a short window of a few
//! minutes and a long window of a day) and admits or denies calls based on
//! remaining capacity in *both* windows. Expired timestamps are pruned
//! before every check, so counters reset naturally as calls age out.
//!
//! The tracker is process-lifetime state shared by every caller issuing
//! remote calls (scheduled and manual sync alike). A restart resets the
//! counters; exact cross-restart quota tracking is a documented non-goal.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::clock::{Clock, SystemClock};

/// Configuration for the two quota windows
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    /// Maximum calls within the short window
    pub short_limit: usize,
    /// Short trailing window duration
    pub short_window: Duration,
    /// Maximum calls within the long window
    pub long_limit: usize,
    /// Long trailing window duration
    pub long_window: Duration,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            short_limit: 200,
            short_window: Duration::from_secs(15 * 60),
            long_limit: 2000,
            long_window: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl QuotaConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.short_limit == 0 || self.long_limit == 0 {
            return Err("window limits must be greater than 0".to_string());
        }
        if self.short_window.is_zero() || self.long_window.is_zero() {
            return Err("window durations must be greater than zero".to_string());
        }
        if self.short_window >= self.long_window {
            return Err("short window must be shorter than long window".to_string());
        }
        Ok(())
    }
}

/// Which window denied admission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowScope {
    Short,
    Long,
}

impl fmt::Display for WindowScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Short => write!(f, "short"),
            Self::Long => write!(f, "long"),
        }
    }
}

/// Admission denied: a window is at capacity.
///
/// `retry_after` is computed from the oldest timestamp in the exhausted
/// window plus the window duration, so callers can back off precisely
/// instead of guessing.
#[derive(Debug, Clone, Error)]
#[error("{scope} window exhausted ({count}/{limit}), retry in {retry_after:?}")]
pub struct QuotaDenied {
    pub scope: WindowScope,
    pub count: usize,
    pub limit: usize,
    pub retry_after: Duration,
}

/// Point-in-time snapshot of both windows, for status reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaStatus {
    pub short_count: usize,
    pub short_limit: usize,
    pub short_remaining: usize,
    pub short_reset_seconds: u64,
    pub long_count: usize,
    pub long_limit: usize,
    pub long_remaining: usize,
    pub long_reset_seconds: u64,
}

struct Windows {
    short: VecDeque<Instant>,
    long: VecDeque<Instant>,
}

impl Windows {
    fn prune(&mut self, now: Instant, config: &QuotaConfig) {
        while self.short.front().is_some_and(|t| now.duration_since(*t) >= config.short_window) {
            self.short.pop_front();
        }
        while self.long.front().is_some_and(|t| now.duration_since(*t) >= config.long_window) {
            self.long.pop_front();
        }
    }

    fn denial(&self, now: Instant, config: &QuotaConfig) -> Option<QuotaDenied> {
        if self.short.len() >= config.short_limit {
            let retry_after = self
                .short
                .front()
                .map(|oldest| config.short_window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(config.short_window);
            return Some(QuotaDenied {
                scope: WindowScope::Short,
                count: self.short.len(),
                limit: config.short_limit,
                retry_after,
            });
        }
        if self.long.len() >= config.long_limit {
            let retry_after = self
                .long
                .front()
                .map(|oldest| config.long_window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(config.long_window);
            return Some(QuotaDenied {
                scope: WindowScope::Long,
                count: self.long.len(),
                limit: config.long_limit,
                retry_after,
            });
        }
        None
    }
}

/// Sliding-window quota tracker
///
/// Both windows live behind a single mutex, so [`QuotaTracker::try_acquire`]
/// is atomic with respect to concurrent callers: two tasks can never both
/// observe spare capacity and jointly exceed a limit.
///
/// Clones share state, mirroring the single upstream quota they guard.
pub struct QuotaTracker<C: Clock = SystemClock> {
    config: QuotaConfig,
    windows: Arc<Mutex<Windows>>,
    clock: Arc<C>,
}

impl QuotaTracker<SystemClock> {
    /// Create a tracker using the system clock
    pub fn new(config: QuotaConfig) -> Result<Self, String> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> QuotaTracker<C> {
    /// Create a tracker with a custom clock
    pub fn with_clock(config: QuotaConfig, clock: C) -> Result<Self, String> {
        config.validate()?;
        Ok(Self {
            config,
            windows: Arc::new(Mutex::new(Windows {
                short: VecDeque::new(),
                long: VecDeque::new(),
            })),
            clock: Arc::new(clock),
        })
    }

    /// Read-only capacity check: does not consume capacity.
    ///
    /// Both windows must have remaining capacity for admission.
    pub fn try_admit(&self) -> Result<(), QuotaDenied> {
        let now = self.clock.now();
        let mut windows = self.windows.lock();
        windows.prune(now, &self.config);
        match windows.denial(now, &self.config) {
            Some(denied) => Err(denied),
            None => Ok(()),
        }
    }

    /// Record that a remote call was actually issued.
    ///
    /// Called exactly once per real network call, not per logical sync
    /// operation, so retries each consume capacity.
    pub fn record_call(&self) {
        let now = self.clock.now();
        let mut windows = self.windows.lock();
        windows.short.push_back(now);
        windows.long.push_back(now);
    }

    /// Check-then-record under a single lock acquisition.
    ///
    /// This is the path concurrent callers use immediately before issuing a
    /// physical call; [`QuotaTracker::try_admit`] remains the advisory gate
    /// for loop-level policy decisions.
    pub fn try_acquire(&self) -> Result<(), QuotaDenied> {
        let now = self.clock.now();
        let mut windows = self.windows.lock();
        windows.prune(now, &self.config);
        if let Some(denied) = windows.denial(now, &self.config) {
            debug!(scope = %denied.scope, retry_after = ?denied.retry_after, "quota denied");
            return Err(denied);
        }
        windows.short.push_back(now);
        windows.long.push_back(now);
        Ok(())
    }

    /// Snapshot counts, limits, and reset estimates for both windows
    pub fn status(&self) -> QuotaStatus {
        let now = self.clock.now();
        let mut windows = self.windows.lock();
        windows.prune(now, &self.config);

        let reset_in = |front: Option<&Instant>, window: Duration| -> u64 {
            front
                .map(|oldest| window.saturating_sub(now.duration_since(*oldest)).as_secs())
                .unwrap_or(0)
        };

        QuotaStatus {
            short_count: windows.short.len(),
            short_limit: self.config.short_limit,
            short_remaining: self.config.short_limit.saturating_sub(windows.short.len()),
            short_reset_seconds: reset_in(windows.short.front(), self.config.short_window),
            long_count: windows.long.len(),
            long_limit: self.config.long_limit,
            long_remaining: self.config.long_limit.saturating_sub(windows.long.len()),
            long_reset_seconds: reset_in(windows.long.front(), self.config.long_window),
        }
    }
}

impl<C: Clock> Clone for QuotaTracker<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            windows: Arc::clone(&self.windows),
            clock: Arc::clone(&self.clock),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    fn small_config() -> QuotaConfig {
        QuotaConfig {
            short_limit: 3,
            short_window: Duration::from_secs(60),
            long_limit: 10,
            long_window: Duration::from_secs(3600),
        }
    }

    #[test]
    fn admits_until_short_window_exhausted() {
        let clock = MockClock::new();
        let tracker = QuotaTracker::with_clock(small_config(), clock.clone()).unwrap();

        for _ in 0..3 {
            tracker.try_admit().unwrap();
            tracker.record_call();
        }

        let denied = tracker.try_admit().unwrap_err();
        assert_eq!(denied.scope, WindowScope::Short);
        assert_eq!(denied.count, 3);
        assert_eq!(denied.retry_after, Duration::from_secs(60));
    }

    #[test]
    fn readmits_after_window_elapses() {
        let clock = MockClock::new();
        let tracker = QuotaTracker::with_clock(small_config(), clock.clone()).unwrap();

        for _ in 0..3 {
            tracker.try_acquire().unwrap();
        }
        assert!(tracker.try_admit().is_err());

        clock.advance_secs(60);
        tracker.try_admit().unwrap();
        assert_eq!(tracker.status().short_count, 0);
    }

    #[test]
    fn retry_after_tracks_oldest_call() {
        let clock = MockClock::new();
        let tracker = QuotaTracker::with_clock(small_config(), clock.clone()).unwrap();

        tracker.try_acquire().unwrap();
        clock.advance_secs(20);
        tracker.try_acquire().unwrap();
        tracker.try_acquire().unwrap();

        // Oldest call was 20s ago in a 60s window.
        let denied = tracker.try_admit().unwrap_err();
        assert_eq!(denied.retry_after, Duration::from_secs(40));
    }

    #[test]
    fn long_window_denies_independently() {
        let clock = MockClock::new();
        let config = QuotaConfig {
            short_limit: 100,
            short_window: Duration::from_secs(60),
            long_limit: 2,
            long_window: Duration::from_secs(3600),
        };
        let tracker = QuotaTracker::with_clock(config, clock.clone()).unwrap();

        tracker.try_acquire().unwrap();
        tracker.try_acquire().unwrap();

        // Short window has room; long window is the one exhausted. Advancing
        // past the short window must not readmit.
        clock.advance_secs(120);
        let denied = tracker.try_admit().unwrap_err();
        assert_eq!(denied.scope, WindowScope::Long);
    }

    #[test]
    fn try_admit_does_not_consume_capacity() {
        let tracker = QuotaTracker::with_clock(small_config(), MockClock::new()).unwrap();

        for _ in 0..10 {
            tracker.try_admit().unwrap();
        }
        assert_eq!(tracker.status().short_count, 0);
    }

    #[test]
    fn status_reports_remaining_and_reset() {
        let clock = MockClock::new();
        let tracker = QuotaTracker::with_clock(small_config(), clock.clone()).unwrap();

        tracker.try_acquire().unwrap();
        clock.advance_secs(15);

        let status = tracker.status();
        assert_eq!(status.short_count, 1);
        assert_eq!(status.short_remaining, 2);
        assert_eq!(status.short_reset_seconds, 45);
        assert_eq!(status.long_remaining, 9);
    }

    #[test]
    fn clones_share_windows() {
        let tracker = QuotaTracker::with_clock(small_config(), MockClock::new()).unwrap();
        let shared = tracker.clone();

        shared.try_acquire().unwrap();
        assert_eq!(tracker.status().short_count, 1);
    }

    #[test]
    fn invalid_config_rejected() {
        assert!(QuotaTracker::new(QuotaConfig { short_limit: 0, ..QuotaConfig::default() })
            .is_err());
        let inverted = QuotaConfig {
            short_window: Duration::from_secs(120),
            long_window: Duration::from_secs(60),
            ..QuotaConfig::default()
        };
        assert!(QuotaTracker::new(inverted).is_err());
    }
}
