//! Scheduler error types

use thiserror::Error;

use pacer_domain::PacerError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("scheduler is not running")]
    NotRunning,

    #[error("scheduler did not stop within {seconds}s")]
    StopTimeout { seconds: u64 },

    #[error("scheduler task failed to join: {0}")]
    TaskJoinFailed(String),
}

impl From<SchedulerError> for PacerError {
    fn from(e: SchedulerError) -> Self {
        PacerError::Internal(e.to_string())
    }
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
