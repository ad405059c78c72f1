use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::types::RunMode;

/// Point-in-time copy of the engine's progress, safe to hand to any observer.
///
/// Full and delta runs share one status; it always describes whichever run
/// touched it last.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunStatus {
    pub is_uploading: bool,
    pub status_text: String,
    pub last_run_start: Option<DateTime<Utc>>,
    pub last_run_end: Option<DateTime<Utc>>,
    pub bytes_uploaded_this_run: u64,
}

/// Owner of the shared [`RunStatus`]. Every method holds the lock only long
/// enough to touch a few fields.
#[derive(Debug, Default)]
pub struct StatusPublisher {
    inner: Mutex<RunStatus>,
}

impl StatusPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the start of a run, before any candidates are known.
    pub fn open_run(&self, mode: RunMode) {
        let mut status = self.inner.lock();
        status.bytes_uploaded_this_run = 0;
        status.last_run_start = Some(Utc::now());
        status.status_text = format!("Preparing {mode} run");
    }

    /// The run has a hash set and is about to hand it to the orchestrator.
    pub fn begin_run(&self, mode: RunMode, hash_count: usize) {
        let mut status = self.inner.lock();
        status.is_uploading = true;
        status.bytes_uploaded_this_run = 0;
        status.status_text = format!("Starting {mode} upload of {hash_count} files");
    }

    pub fn update_status(&self, text: impl Into<String>) {
        self.inner.lock().status_text = text.into();
    }

    /// Record the running byte total reported for the current run.
    pub fn update_bytes(&self, total: u64) {
        self.inner.lock().bytes_uploaded_this_run = total;
    }

    pub fn end_run(&self) {
        let mut status = self.inner.lock();
        status.is_uploading = false;
        status.last_run_end = Some(Utc::now());
    }

    /// End the current run with `text` as the final status in one step.
    pub fn finish_run(&self, text: impl Into<String>) {
        let mut status = self.inner.lock();
        status.status_text = text.into();
        status.is_uploading = false;
        status.last_run_end = Some(Utc::now());
    }

    pub fn snapshot(&self) -> RunStatus {
        self.inner.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_reset_only_when_a_run_begins() {
        let publisher = StatusPublisher::new();
        publisher.begin_run(RunMode::Full, 3);
        publisher.update_bytes(1024);
        publisher.update_status("uploading");
        assert_eq!(publisher.snapshot().bytes_uploaded_this_run, 1024);

        publisher.end_run();
        let ended = publisher.snapshot();
        assert!(!ended.is_uploading);
        assert!(ended.last_run_end.is_some());
        assert_eq!(ended.bytes_uploaded_this_run, 1024);

        publisher.begin_run(RunMode::Delta, 1);
        let restarted = publisher.snapshot();
        assert!(restarted.is_uploading);
        assert_eq!(restarted.bytes_uploaded_this_run, 0);
    }

    #[test]
    fn finish_run_sets_text_and_clears_flag() {
        let publisher = StatusPublisher::new();
        publisher.open_run(RunMode::Full);
        assert!(!publisher.snapshot().is_uploading);
        publisher.begin_run(RunMode::Full, 5);
        publisher.finish_run("Completed, 1 skipped");

        let status = publisher.snapshot();
        assert_eq!(status.status_text, "Completed, 1 skipped");
        assert!(!status.is_uploading);
        assert!(status.last_run_start.is_some());
        assert!(status.last_run_start <= status.last_run_end);
    }
}
