//! # Pacer Common
//!
//! Reusable mechanisms with no domain coupling:
//! - **Clock abstraction**: real system time in production, controlled mock
//!   time in tests
//! - **Quota tracking**: sliding-window rate limiting over two trailing
//!   windows
//! - **Retry execution**: classification-driven retry with exponential
//!   backoff for remote calls
//!
//! Everything here is explicitly constructed and injectable; no ambient
//! global state.

pub mod clock;
pub mod ratelimit;
pub mod retry;

pub use clock::{Clock, MockClock, SystemClock};
pub use ratelimit::{QuotaConfig, QuotaDenied, QuotaStatus, QuotaTracker, WindowScope};
pub use retry::{CallError, CredentialRefresh, RetryExecutor, RetryPolicy};
