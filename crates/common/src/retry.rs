//! Classification-driven retry with exponential backoff
//!
//! Wraps a single remote call and retries it according to the error class:
//! network-level failures and overloaded-upstream statuses (429, 5xx) are
//! retried with exponential backoff; 401 gets at most one retry after an
//! externally-supplied credential refresh; every other 4xx is fatal; a local
//! quota denial is never retried (it is a planned early stop for the
//! caller, not a failure of the remote).

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info, warn};

/// HTTP status codes that warrant a retry with backoff
const RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Error from a single attempt of a remote call
#[derive(Debug, Clone, Error)]
pub enum CallError {
    /// Transport-level failure (timeout, connection reset, DNS)
    #[error("network error: {0}")]
    Network(String),

    /// The remote answered with a non-success status
    #[error("status {code}: {message}")]
    Status {
        code: u16,
        /// Server-supplied wait hint (Retry-After), if any
        retry_after: Option<Duration>,
        message: String,
    },

    /// Local quota tracker denied the call before it was issued
    #[error("local quota exhausted, retry in {retry_after:?}")]
    QuotaExhausted { retry_after: Duration },
}

/// How the executor should react to a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry with backoff
    Transient,
    /// Retry once after a credential refresh
    Unauthorized,
    /// Do not retry
    Fatal,
    /// Planned local stop; surfaced to the caller untouched
    Quota,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::Fatal => write!(f, "fatal"),
            Self::Quota => write!(f, "quota"),
        }
    }
}

impl CallError {
    /// Classify this error for retry purposes
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Network(_) => ErrorClass::Transient,
            Self::Status { code: 401, .. } => ErrorClass::Unauthorized,
            Self::Status { code, .. } if RETRYABLE_STATUS_CODES.contains(code) => {
                ErrorClass::Transient
            }
            Self::Status { .. } => ErrorClass::Fatal,
            Self::QuotaExhausted { .. } => ErrorClass::Quota,
        }
    }

    /// Server-supplied wait hint, when one accompanied the failure
    pub fn retry_hint(&self) -> Option<Duration> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Exponential backoff schedule
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retry budget beyond the first attempt
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before the (retry_index + 2)-th attempt:
    /// `min(initial * multiplier^retry_index, max)`.
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        let factor = self.multiplier.powi(retry_index as i32);
        let delay = self.initial_backoff.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_backoff.as_secs_f64()))
    }
}

/// Hook invoked when an attempt fails with 401.
///
/// The executor never owns credential mechanics; it only signals that a
/// refresh is worth trying. Returning `true` grants exactly one extra
/// attempt.
#[async_trait]
pub trait CredentialRefresh: Send + Sync {
    async fn refresh(&self) -> bool;
}

/// Retrying call executor
///
/// `execute` drives a no-argument async operation to success or terminal
/// failure under the configured policy. Every retry is logged with the
/// operation description, attempt number, and computed delay.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    refresh: Option<Arc<dyn CredentialRefresh>>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, refresh: None }
    }

    /// Attach a credential refresh hook for the single 401 retry
    pub fn with_refresh(mut self, refresh: Arc<dyn CredentialRefresh>) -> Self {
        self.refresh = Some(refresh);
        self
    }

    /// Execute the operation, retrying per classification and backoff.
    ///
    /// Returns the last error once the retry budget is exhausted or a fatal
    /// error is observed. The caller decides whether to surface the failure
    /// or skip the unit of work.
    pub async fn execute<T, F, Fut>(
        &self,
        description: &str,
        mut operation: F,
    ) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let mut retries_used: u32 = 0;
        let mut refresh_spent = false;

        loop {
            match operation().await {
                Ok(value) => {
                    if retries_used > 0 {
                        info!(
                            operation = description,
                            attempts = retries_used + 1,
                            "call succeeded after retries"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => match err.class() {
                    ErrorClass::Quota => return Err(err),
                    ErrorClass::Fatal => {
                        error!(operation = description, error = %err, "non-retryable failure");
                        return Err(err);
                    }
                    ErrorClass::Unauthorized => {
                        // One refresh-then-retry; the transient budget is
                        // untouched because this is a policy boundary, not
                        // backoff.
                        if !refresh_spent {
                            if let Some(hook) = &self.refresh {
                                refresh_spent = true;
                                warn!(operation = description, "401 received, refreshing credentials");
                                if hook.refresh().await {
                                    continue;
                                }
                            }
                        }
                        return Err(err);
                    }
                    ErrorClass::Transient => {
                        if retries_used >= self.policy.max_retries {
                            error!(
                                operation = description,
                                attempts = retries_used + 1,
                                error = %err,
                                "retries exhausted"
                            );
                            return Err(err);
                        }

                        let mut delay = self.policy.delay_for(retries_used);
                        // A server wait hint (429 Retry-After) overrides the
                        // computed delay when larger.
                        if let Some(hint) = err.retry_hint() {
                            if hint > delay {
                                delay = hint;
                            }
                        }
                        retries_used += 1;

                        warn!(
                            operation = description,
                            attempt = retries_used,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "retrying after backoff"
                        );
                        tokio::time::sleep(delay).await;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    fn transient(code: u16) -> CallError {
        CallError::Status { code, retry_after: None, message: "boom".into() }
    }

    #[test]
    fn classification_matches_policy() {
        assert_eq!(CallError::Network("reset".into()).class(), ErrorClass::Transient);
        for code in [429, 500, 502, 503, 504] {
            assert_eq!(transient(code).class(), ErrorClass::Transient);
        }
        assert_eq!(transient(401).class(), ErrorClass::Unauthorized);
        for code in [400, 403, 404, 422] {
            assert_eq!(transient(code).class(), ErrorClass::Fatal);
        }
        let quota = CallError::QuotaExhausted { retry_after: Duration::from_secs(5) };
        assert_eq!(quota.class(), ErrorClass::Quota);
    }

    #[test]
    fn default_backoff_sequence_is_1_2_4() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
    }

    #[test]
    fn backoff_is_capped_at_max() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(10), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_budget_exhausted() {
        let attempts = AtomicUsize::new(0);
        let executor = RetryExecutor::new(RetryPolicy::default());

        let result: Result<(), CallError> = executor
            .execute("always failing", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(transient(503)) }
            })
            .await;

        // 1 initial attempt + 3 retries, then the last error surfaces.
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert!(matches!(result, Err(CallError::Status { code: 503, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let attempts = AtomicUsize::new(0);
        let executor = RetryExecutor::new(RetryPolicy::default());

        let result = executor
            .execute("flaky", || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(CallError::Network("connection reset".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_status_is_not_retried() {
        let attempts = AtomicUsize::new(0);
        let executor = RetryExecutor::new(RetryPolicy::default());

        let result: Result<(), CallError> = executor
            .execute("rejected", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(transient(404)) }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(CallError::Status { code: 404, .. })));
    }

    #[tokio::test]
    async fn quota_denial_is_surfaced_untouched() {
        let attempts = AtomicUsize::new(0);
        let executor = RetryExecutor::new(RetryPolicy::default());

        let result: Result<(), CallError> = executor
            .execute("gated", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(CallError::QuotaExhausted { retry_after: Duration::from_secs(30) }) }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(CallError::QuotaExhausted { .. })));
    }

    struct FlipRefresh {
        called: AtomicUsize,
        succeed: AtomicBool,
    }

    #[async_trait]
    impl CredentialRefresh for FlipRefresh {
        async fn refresh(&self) -> bool {
            self.called.fetch_add(1, Ordering::SeqCst);
            self.succeed.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn unauthorized_retried_once_after_refresh() {
        let refresh = Arc::new(FlipRefresh {
            called: AtomicUsize::new(0),
            succeed: AtomicBool::new(true),
        });
        let attempts = AtomicUsize::new(0);
        let executor = RetryExecutor::new(RetryPolicy::default()).with_refresh(refresh.clone());

        // 401 on every attempt: one refresh is granted, a second 401 is final.
        let result: Result<(), CallError> = executor
            .execute("expired token", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(transient(401)) }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(refresh.called.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(CallError::Status { code: 401, .. })));
    }

    #[tokio::test]
    async fn failed_refresh_ends_the_call() {
        let refresh = Arc::new(FlipRefresh {
            called: AtomicUsize::new(0),
            succeed: AtomicBool::new(false),
        });
        let attempts = AtomicUsize::new(0);
        let executor = RetryExecutor::new(RetryPolicy::default()).with_refresh(refresh);

        let result: Result<(), CallError> = executor
            .execute("expired token", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(transient(401)) }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn server_wait_hint_stretches_backoff() {
        let attempts = AtomicUsize::new(0);
        let executor = RetryExecutor::new(RetryPolicy::default());
        let started = tokio::time::Instant::now();

        let result = executor
            .execute("throttled", || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(CallError::Status {
                            code: 429,
                            retry_after: Some(Duration::from_secs(10)),
                            message: "slow down".into(),
                        })
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        result.unwrap();
        // The 10s hint overrides the computed 1s first delay.
        assert!(started.elapsed() >= Duration::from_secs(10));
    }
}
