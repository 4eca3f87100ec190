//! Configuration management
//!
//! Data directory, node id and mining difficulty, read from an optional TOML
//! file and the environment.

pub mod settings;

pub use settings::{Config, Settings, GLOBAL_CONFIG, MAX_DIFFICULTY};
