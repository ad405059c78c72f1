use std::path::PathBuf;

use modcache_core::PrecacheError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read modcache config from {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid modcache config {origin}: {message}")]
    Parse { origin: String, message: String },
    #[error("invalid modcache config json")]
    Json(#[source] serde_json::Error),
    #[error("modcache config rejected")]
    Invalid(#[source] PrecacheError),
    #[error("store_dir must not be empty")]
    EmptyStoreDir,
}
