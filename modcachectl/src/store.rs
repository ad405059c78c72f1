//! Reference collaborators: a SHA-256 content cache and a directory-backed
//! content-addressed store standing in for the remote file cache.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use modcache_core::ports::{ContentCache, UploadOrchestrator, UploadProgress};
use modcache_core::{ContentHash, PrecacheError, Result};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::task::spawn_blocking;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Where each hash was last seen locally. The cache writes it, the store
/// reads it to find the bytes behind a hash.
#[derive(Debug, Default, Clone)]
pub struct BlobIndex {
    inner: Arc<Mutex<HashMap<ContentHash, PathBuf>>>,
}

impl BlobIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, hash: ContentHash, path: PathBuf) {
        self.inner.lock().insert(hash, path);
    }

    pub fn source_of(&self, hash: &ContentHash) -> Option<PathBuf> {
        self.inner.lock().get(hash).cloned()
    }
}

fn hash_file(path: &Path) -> io::Result<ContentHash> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(ContentHash::new(hex::encode(hasher.finalize())))
}

/// Hashes file contents with SHA-256. Unreadable files resolve to `None`.
#[derive(Debug, Clone)]
pub struct Sha256ContentCache {
    index: BlobIndex,
}

impl Sha256ContentCache {
    pub fn new(index: BlobIndex) -> Self {
        Self { index }
    }
}

#[async_trait]
impl ContentCache for Sha256ContentCache {
    async fn resolve(&self, paths: Vec<PathBuf>) -> Result<HashMap<PathBuf, Option<ContentHash>>> {
        let index = self.index.clone();
        spawn_blocking(move || {
            paths
                .into_iter()
                .map(|path| {
                    let hash = match hash_file(&path) {
                        Ok(hash) => {
                            index.record(hash.clone(), path.clone());
                            Some(hash)
                        }
                        Err(err) => {
                            debug!(target: "precache::run", path = %path.display(), error = %err, "file could not be hashed");
                            None
                        }
                    };
                    (path, hash)
                })
                .collect()
        })
        .await
        .map_err(|err| PrecacheError::Internal(format!("hashing task failed: {err}")))
    }
}

/// Content-addressed blob directory: one file per hash, named by the hash.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
    index: BlobIndex,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>, index: BlobIndex) -> Self {
        Self {
            root: root.into(),
            index,
        }
    }

    pub fn blob_path(&self, hash: &ContentHash) -> PathBuf {
        self.root.join(hash.as_str())
    }

    /// Copy one blob in. Returns the bytes written, `0` if it was present.
    async fn put(&self, hash: &ContentHash, source: &Path) -> Result<u64> {
        let target = self.blob_path(hash);
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Ok(0);
        }
        let staging = self.root.join(format!(".{}.partial", hash.as_str()));
        let written = tokio::fs::copy(source, &staging).await?;
        tokio::fs::rename(&staging, &target).await?;
        Ok(written)
    }
}

#[async_trait]
impl UploadOrchestrator for DirectoryStore {
    async fn is_ready(&self) -> bool {
        tokio::fs::create_dir_all(&self.root).await.is_ok()
    }

    async fn upload(
        &self,
        hashes: HashSet<ContentHash>,
        progress: UploadProgress,
        cancel: CancellationToken,
    ) -> Result<HashSet<ContentHash>> {
        let ordered: BTreeSet<ContentHash> = hashes.into_iter().collect();
        let total = ordered.len();
        let mut undeliverable = HashSet::new();
        let mut bytes = 0u64;

        for (done, hash) in ordered.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(PrecacheError::Cancelled("store upload".into()));
            }

            let Some(source) = self.index.source_of(&hash) else {
                undeliverable.insert(hash);
                continue;
            };
            match self.put(&hash, &source).await {
                Ok(written) => bytes += written,
                Err(err) => {
                    warn!(target: "precache::run", %hash, source = %source.display(), error = %err, "blob could not be stored");
                    undeliverable.insert(hash);
                }
            }
            progress.bytes(bytes);
            progress.status(format!("Uploaded {}/{total} files", done + 1));
        }

        Ok(undeliverable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn identical_files_share_one_hash() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mdl");
        let b = dir.path().join("b.mdl");
        let missing = dir.path().join("gone.mdl");
        fs::write(&a, b"same bytes").unwrap();
        fs::write(&b, b"same bytes").unwrap();

        let cache = Sha256ContentCache::new(BlobIndex::new());
        let resolved = cache
            .resolve(vec![a.clone(), b.clone(), missing.clone()])
            .await
            .unwrap();

        let ha = resolved[&a].clone().unwrap();
        assert_eq!(resolved[&b].as_ref(), Some(&ha));
        assert_eq!(ha.as_str().len(), 64);
        assert!(resolved[&missing].is_none());
    }

    #[tokio::test]
    async fn store_copies_known_blobs_and_skips_unknown() {
        let src = tempfile::tempdir().unwrap();
        let store_dir = tempfile::tempdir().unwrap();
        let file = src.path().join("body.tex");
        fs::write(&file, vec![7u8; 1000]).unwrap();

        let index = BlobIndex::new();
        let cache = Sha256ContentCache::new(index.clone());
        let hash = cache.resolve(vec![file.clone()]).await.unwrap()[&file]
            .clone()
            .unwrap();
        let store = DirectoryStore::new(store_dir.path().join("blobs"), index);
        assert!(store.is_ready().await);

        let unknown = ContentHash::from("deadbeef");
        let hashes: HashSet<_> = [hash.clone(), unknown.clone()].into_iter().collect();
        let skipped = store
            .upload(hashes.clone(), UploadProgress::noop(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(skipped, HashSet::from([unknown]));
        assert_eq!(fs::read(store.blob_path(&hash)).unwrap().len(), 1000);

        let again = store
            .upload(hashes, UploadProgress::noop(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(again.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_upload_stops_early() {
        let store_dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(store_dir.path(), BlobIndex::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = store
            .upload(
                [ContentHash::from("abc")].into_iter().collect(),
                UploadProgress::noop(),
                cancel,
            )
            .await;
        assert!(matches!(result, Err(PrecacheError::Cancelled(_))));
    }
}
