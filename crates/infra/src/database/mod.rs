//! SQLite persistence layer

pub mod activity_store;
pub mod manager;

pub use activity_store::SqliteActivityStore;
pub use manager::DbManager;
