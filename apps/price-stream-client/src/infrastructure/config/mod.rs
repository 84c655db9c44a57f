//! Configuration Module
//!
//! Configuration loading for the price stream client.

mod settings;

pub use settings::{ClientConfig, ConfigError, FeedSettings, ServerSettings};
