//! Credential storage and refresh

pub mod token_store;

pub use token_store::{SqliteTokenProvider, TokenSet};
