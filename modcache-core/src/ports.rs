//! Boundaries to the collaborators the engine drives but does not own.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::ContentHash;

/// Reports which content roots are currently enabled.
///
/// An empty list means nothing is eligible. Implementations must never
/// substitute a broader location when they cannot answer; return an error
/// or an empty list instead.
#[async_trait]
pub trait ModRootResolver: Send + Sync {
    async fn enabled_roots(&self) -> Result<Vec<PathBuf>>;
}

/// Resolves paths to content hashes. `None` means the path has no usable
/// content right now and is dropped from the run.
#[async_trait]
pub trait ContentCache: Send + Sync {
    async fn resolve(&self, paths: Vec<PathBuf>) -> Result<HashMap<PathBuf, Option<ContentHash>>>;
}

/// Pushes blobs to the remote content-addressed store.
#[async_trait]
pub trait UploadOrchestrator: Send + Sync {
    /// Whether uploads can be accepted right now (e.g. a live connection exists).
    async fn is_ready(&self) -> bool;

    /// Upload whatever the remote is missing from `hashes`. Returns the hashes
    /// that could not be delivered (missing locally or refused remotely).
    async fn upload(
        &self,
        hashes: HashSet<ContentHash>,
        progress: UploadProgress,
        cancel: CancellationToken,
    ) -> Result<HashSet<ContentHash>>;
}

type StatusFn = dyn Fn(String) + Send + Sync;
type BytesFn = dyn Fn(u64) + Send + Sync;

/// Progress sinks handed to the orchestrator for one upload call.
#[derive(Clone)]
pub struct UploadProgress {
    on_status: Arc<StatusFn>,
    on_bytes: Arc<BytesFn>,
}

impl fmt::Debug for UploadProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UploadProgress")
    }
}

impl UploadProgress {
    pub fn new(
        on_status: impl Fn(String) + Send + Sync + 'static,
        on_bytes: impl Fn(u64) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_status: Arc::new(on_status),
            on_bytes: Arc::new(on_bytes),
        }
    }

    pub fn noop() -> Self {
        Self::new(|_| {}, |_| {})
    }

    /// Textual phase update.
    pub fn status(&self, text: impl Into<String>) {
        (self.on_status)(text.into());
    }

    /// Running total of bytes transferred during this upload call.
    pub fn bytes(&self, total: u64) {
        (self.on_bytes)(total);
    }
}

/// Resolver backed by a fixed, replaceable list of roots.
#[derive(Debug, Default, Clone)]
pub struct StaticRootResolver {
    roots: Arc<RwLock<Vec<PathBuf>>>,
}

impl StaticRootResolver {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots: Arc::new(RwLock::new(roots)),
        }
    }

    pub fn set_roots(&self, roots: Vec<PathBuf>) {
        *self.roots.write() = roots;
    }
}

#[async_trait]
impl ModRootResolver for StaticRootResolver {
    async fn enabled_roots(&self) -> Result<Vec<PathBuf>> {
        Ok(self.roots.read().clone())
    }
}
