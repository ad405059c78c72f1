//! Pending delta set.
//!
//! Filesystem callbacks push changed paths in from any thread; the scheduler
//! takes the whole set in one swap when a delta run starts. Individual
//! entries are never removed, so there is no iterate-then-remove window.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::eligibility::RuleSource;

/// Identity key used to deduplicate paths. Case-folded on platforms whose
/// default filesystems are case-insensitive.
pub fn path_identity(path: &Path) -> String {
    let raw = path.to_string_lossy();
    if cfg!(any(windows, target_os = "macos")) {
        raw.to_lowercase()
    } else {
        raw.into_owned()
    }
}

/// What one [`DeltaAccumulator::record_changed`] call did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Recorded {
    /// Paths in the batch that passed the rule, already pending or not.
    pub eligible: usize,
    /// Paths that were not already pending.
    pub inserted: usize,
}

pub struct DeltaAccumulator {
    rules: Arc<dyn RuleSource>,
    pending: Mutex<HashMap<String, PathBuf>>,
}

impl fmt::Debug for DeltaAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeltaAccumulator")
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

impl DeltaAccumulator {
    pub fn new(rules: Arc<dyn RuleSource>) -> Self {
        Self {
            rules,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Filter `paths` through the current rule and add the survivors.
    pub fn record_changed<I, P>(&self, paths: I) -> Recorded
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let rule = self.rules.current_rule();
        let eligible: Vec<(String, PathBuf)> = paths
            .into_iter()
            .map(Into::into)
            .filter(|path| rule.matches(path))
            .map(|path| (path_identity(&path), path))
            .collect();

        if eligible.is_empty() {
            return Recorded::default();
        }

        let mut guard = self.pending.lock();
        let mut recorded = Recorded {
            eligible: eligible.len(),
            inserted: 0,
        };
        for (key, path) in eligible {
            if guard.insert(key, path).is_none() {
                recorded.inserted += 1;
            }
        }
        trace!(
            target: "precache::delta",
            eligible = recorded.eligible,
            inserted = recorded.inserted,
            pending = guard.len(),
            "recorded changed paths"
        );
        recorded
    }

    /// Take the entire pending set, leaving it empty.
    pub fn drain(&self) -> HashSet<PathBuf> {
        let taken = mem::take(&mut *self.pending.lock());
        taken.into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Drop everything pending. Returns how many paths were discarded.
    pub fn clear(&self) -> usize {
        let mut guard = self.pending.lock();
        let discarded = guard.len();
        guard.clear();
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eligibility::EligibilityRule;
    use std::thread;

    fn accumulator() -> DeltaAccumulator {
        DeltaAccumulator::new(Arc::new(EligibilityRule::new(&["mdl", "tex"], &["temp"])))
    }

    #[test]
    fn ineligible_paths_are_never_stored() {
        let delta = accumulator();
        let recorded = delta.record_changed(["/m/a.mdl", "/m/b.png", "/m/temp/c.mdl"]);
        assert_eq!(recorded, Recorded { eligible: 1, inserted: 1 });
        assert_eq!(delta.drain(), HashSet::from([PathBuf::from("/m/a.mdl")]));
    }

    #[test]
    fn duplicates_collapse() {
        let delta = accumulator();
        delta.record_changed(["/m/a.mdl", "/m/a.mdl"]);
        assert_eq!(
            delta.record_changed(["/m/a.mdl"]),
            Recorded { eligible: 1, inserted: 0 }
        );
        assert_eq!(delta.len(), 1);
    }

    #[test]
    fn drain_empties_the_set() {
        let delta = accumulator();
        delta.record_changed(["/m/a.mdl", "/m/b.tex"]);
        assert_eq!(delta.drain().len(), 2);
        assert!(delta.is_empty());
        assert!(delta.drain().is_empty());
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        let delta = Arc::new(accumulator());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let delta = Arc::clone(&delta);
                thread::spawn(move || {
                    for i in 0..250 {
                        delta.record_changed([format!("/m/{worker}/{i}.mdl")]);
                    }
                })
            })
            .collect();

        let mut collected = HashSet::new();
        for handle in handles {
            collected.extend(delta.drain());
            handle.join().unwrap();
        }
        collected.extend(delta.drain());

        assert_eq!(collected.len(), 8 * 250);
    }

    #[test]
    fn clear_reports_discarded_count() {
        let delta = accumulator();
        delta.record_changed(["/m/a.mdl", "/m/b.tex"]);
        assert_eq!(delta.clear(), 2);
        assert!(delta.is_empty());
    }
}
