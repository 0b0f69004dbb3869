//! HTTP adapters for remote services

pub mod feed_client;

pub use feed_client::FeedClient;
