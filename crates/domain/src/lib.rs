//! # Pacer Domain
//!
//! Business domain types and models for Pacer.
//!
//! This crate contains:
//! - Domain data types (ActivitySummary, UpsertOutcome)
//! - Domain error types and Result definitions
//! - Configuration structures
//!
//! ## Architecture
//! - No dependencies on other Pacer crates
//! - Only external dependencies allowed
//! - Pure domain models and data structures

pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
