//! Infrastructure adapters for the Pacer sync engine.
//!
//! This crate supplies the concrete implementations behind the ports in
//! `pacer-core`: an HTTP activity feed client, SQLite-backed persistence
//! for activities and OAuth tokens, the background sync scheduler, and
//! configuration loading.

pub mod api;
pub mod auth;
pub mod config;
pub mod database;
pub mod scheduling;

pub use api::FeedClient;
pub use auth::SqliteTokenProvider;
pub use config::load_config;
pub use database::{DbManager, SqliteActivityStore};
pub use scheduling::{SchedulerError, SyncScheduler, SyncSchedulerConfig};
