use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque content hash as produced by the content cache.
///
/// The engine only compares and forwards hashes; the encoding belongs to the
/// cache implementation.
#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(pub String);

impl ContentHash {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentHash {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Which planner feeds a run.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Enumerate every enabled root.
    Full,
    /// Only the paths reported as changed since the last delta run.
    Delta,
}

impl RunMode {
    pub const ALL: [RunMode; 2] = [RunMode::Full, RunMode::Delta];

    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Full => "full",
            RunMode::Delta => "delta",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Push notifications the engine reacts to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Trigger {
    InitializationComplete,
    LoginComplete,
    ContentRootChanged,
    ContentSettingsChanged,
    /// Files were added or changed on disk.
    FilesChanged(Vec<PathBuf>),
    /// Explicit "run now" request.
    Manual,
}

impl Trigger {
    pub fn mode(&self) -> RunMode {
        match self {
            Trigger::FilesChanged(_) => RunMode::Delta,
            Trigger::InitializationComplete
            | Trigger::LoginComplete
            | Trigger::ContentRootChanged
            | Trigger::ContentSettingsChanged
            | Trigger::Manual => RunMode::Full,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Trigger::InitializationComplete => "initialization_complete",
            Trigger::LoginComplete => "login_complete",
            Trigger::ContentRootChanged => "content_root_changed",
            Trigger::ContentSettingsChanged => "content_settings_changed",
            Trigger::FilesChanged(_) => "files_changed",
            Trigger::Manual => "manual",
        }
    }
}

/// A single executing run. Exists from the moment debounce settles until the
/// run returns.
#[derive(Clone, Debug)]
pub struct ScanRun {
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub candidate_paths: HashSet<PathBuf>,
    pub resolved_hashes: HashSet<ContentHash>,
}

impl ScanRun {
    pub fn new(mode: RunMode) -> Self {
        Self {
            mode,
            started_at: Utc::now(),
            candidate_paths: HashSet::new(),
            resolved_hashes: HashSet::new(),
        }
    }
}

/// How a run ended. Every variant leaves the scheduler ready for the next
/// trigger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { submitted: usize, skipped: usize },
    NothingToDo,
    /// The resolver reported no enabled roots.
    NoEnabledContent,
    Unavailable,
    Disabled,
    Cancelled,
    Failed(String),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            RunOutcome::Completed { .. } | RunOutcome::NothingToDo | RunOutcome::NoEnabledContent
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_batches_map_to_delta_everything_else_to_full() {
        assert_eq!(
            Trigger::FilesChanged(vec![PathBuf::from("/a.mdl")]).mode(),
            RunMode::Delta
        );
        for trigger in [
            Trigger::InitializationComplete,
            Trigger::LoginComplete,
            Trigger::ContentRootChanged,
            Trigger::ContentSettingsChanged,
            Trigger::Manual,
        ] {
            assert_eq!(trigger.mode(), RunMode::Full, "{}", trigger.label());
        }
    }
}
