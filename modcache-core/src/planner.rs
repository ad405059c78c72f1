//! Full-scan planning.
//!
//! Walks every enabled root breadth-first through the [`FileSystem`]
//! abstraction. A directory that cannot be listed is skipped on its own; its
//! siblings and the rest of the tree are still enumerated.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::eligibility::EligibilityRule;
use crate::fs::FileSystem;

/// Bounds recursion through symlink cycles.
pub const MAX_DEPTH: usize = 64;

/// Counters describing a finished enumeration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub files_seen: usize,
    pub directories_skipped: usize,
    pub roots_missing: usize,
}

/// Result of a full enumeration.
#[derive(Clone, Debug, Default)]
pub struct FullScanPlan {
    pub candidates: HashSet<PathBuf>,
    pub report: ScanReport,
    /// True when enumeration stopped early because of cancellation.
    pub interrupted: bool,
}

#[derive(Clone)]
pub struct FullScanPlanner {
    fs: Arc<dyn FileSystem>,
    max_depth: usize,
}

impl std::fmt::Debug for FullScanPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FullScanPlanner")
            .field("fs_type", &std::any::type_name_of_val(self.fs.as_ref()))
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

impl FullScanPlanner {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            max_depth: MAX_DEPTH,
        }
    }

    /// Directories this many levels below a root are not listed; each one
    /// left out counts as skipped.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    pub fn fs(&self) -> Arc<dyn FileSystem> {
        Arc::clone(&self.fs)
    }

    /// Enumerate eligible files under `roots`. No roots means no candidates.
    pub async fn plan(
        &self,
        roots: &[PathBuf],
        rule: &EligibilityRule,
        cancel: &CancellationToken,
    ) -> FullScanPlan {
        let mut plan = FullScanPlan::default();
        let mut queue: VecDeque<(PathBuf, usize)> = VecDeque::new();

        for root in roots {
            if !self.fs.path_exists(root).await {
                debug!(target: "precache::planner", root = %root.display(), "enabled root missing");
                plan.report.roots_missing += 1;
                continue;
            }
            queue.push_back((root.clone(), 0));
        }

        while let Some((dir, depth)) = queue.pop_front() {
            if cancel.is_cancelled() {
                plan.interrupted = true;
                break;
            }

            let mut entries = match self.fs.read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) => {
                    debug!(target: "precache::planner", dir = %dir.display(), error = %err, "skipping unreadable directory");
                    plan.report.directories_skipped += 1;
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(err) => {
                        debug!(target: "precache::planner", dir = %dir.display(), error = %err, "directory listing aborted");
                        plan.report.directories_skipped += 1;
                        break;
                    }
                };

                let Ok(meta) = self.fs.metadata(&entry).await else {
                    continue;
                };

                if meta.is_dir {
                    if depth + 1 < self.max_depth {
                        queue.push_back((entry, depth + 1));
                    } else {
                        debug!(target: "precache::planner", dir = %entry.display(), max_depth = self.max_depth, "directory below depth limit not listed");
                        plan.report.directories_skipped += 1;
                    }
                } else if meta.is_file {
                    plan.report.files_seen += 1;
                    if rule.matches(&entry) {
                        plan.candidates.insert(entry);
                    }
                }
            }
        }

        plan
    }
}
