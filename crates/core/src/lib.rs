//! # Pacer Core
//!
//! The sync coordinator and the port traits it consumes.
//!
//! ## Architecture
//! - Defines ports (traits) implemented by `pacer-infra`
//! - Pure orchestration: no I/O of its own beyond the injected ports
//! - Depends only on `pacer-domain` and `pacer-common`

pub mod sync;

pub use sync::ports::{ActivityFeed, ActivityStore, TokenProvider};
pub use sync::report::{SyncOptions, SyncOutcome, SyncReport};
pub use sync::service::SyncService;
