//! Configuration loading for the modcache engine and its CLI.

pub mod error;
pub mod models;

pub use error::ConfigLoadError;
pub use models::{CONFIG_JSON_VAR, CONFIG_PATH_VAR, ConfigSource, ModcacheConfig};
