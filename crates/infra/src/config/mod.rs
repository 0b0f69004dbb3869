//! Configuration loading

pub mod loader;

pub use loader::{load as load_config, load_from_env, load_from_file};
