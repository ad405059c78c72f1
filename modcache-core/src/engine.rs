//! Engine facade and the per-run pipeline.
//!
//! [`PrecacheEngine`] turns host notifications into scheduler triggers and
//! exposes the status snapshot. The scheduler calls back into
//! [`RunPipeline`], which plans candidates, resolves hashes and hands the
//! distinct hash set to the upload orchestrator.

use std::collections::HashSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, SettingsHandle};
use crate::delta::DeltaAccumulator;
use crate::eligibility::RuleSource;
use crate::error::{PrecacheError, Result};
use crate::fs::FileSystem;
use crate::planner::FullScanPlanner;
use crate::ports::{ContentCache, ModRootResolver, UploadOrchestrator, UploadProgress};
use crate::scheduler::{CoalescingScheduler, RunExecutor, ShutdownReport, panic_message};
use crate::status::{RunStatus, StatusPublisher};
use crate::types::{ContentHash, RunMode, RunOutcome, ScanRun, Trigger};

pub const STATUS_UNAVAILABLE: &str = "Content directory unavailable";
pub const STATUS_NO_ROOTS: &str = "No enabled content";
pub const STATUS_UP_TO_DATE: &str = "Up to date";
pub const STATUS_WAITING: &str = "Waiting for connection";
pub const STATUS_CANCELLED: &str = "Canceled";
pub const STATUS_DISABLED: &str = "Precache disabled";

/// Collaborators the engine drives.
#[derive(Clone)]
pub struct EngineDeps {
    pub settings: SettingsHandle,
    pub roots: Arc<dyn ModRootResolver>,
    pub fs: Arc<dyn FileSystem>,
    pub cache: Arc<dyn ContentCache>,
    pub orchestrator: Arc<dyn UploadOrchestrator>,
}

impl fmt::Debug for EngineDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineDeps")
            .field("settings", &self.settings)
            .field("roots", &std::any::type_name_of_val(self.roots.as_ref()))
            .field("fs", &std::any::type_name_of_val(self.fs.as_ref()))
            .field("cache", &std::any::type_name_of_val(self.cache.as_ref()))
            .field(
                "orchestrator",
                &std::any::type_name_of_val(self.orchestrator.as_ref()),
            )
            .finish()
    }
}

pub struct PrecacheEngine {
    config: EngineConfig,
    settings: SettingsHandle,
    delta: Arc<DeltaAccumulator>,
    status: Arc<StatusPublisher>,
    scheduler: CoalescingScheduler,
}

impl fmt::Debug for PrecacheEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrecacheEngine")
            .field("config", &self.config)
            .field("pending_delta", &self.delta.len())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl PrecacheEngine {
    /// Build the engine. Must be called inside a tokio runtime.
    pub fn new(deps: EngineDeps, config: EngineConfig) -> Result<Self> {
        let delta = Arc::new(DeltaAccumulator::new(Arc::new(deps.settings.clone())));
        let status = Arc::new(StatusPublisher::new());
        let pipeline = Arc::new(RunPipeline {
            config,
            settings: deps.settings.clone(),
            roots: deps.roots,
            planner: FullScanPlanner::new(deps.fs),
            delta: Arc::clone(&delta),
            cache: deps.cache,
            orchestrator: deps.orchestrator,
            status: Arc::clone(&status),
        });
        let scheduler = CoalescingScheduler::new(pipeline, config, CancellationToken::new())?;

        Ok(Self {
            config,
            settings: deps.settings,
            delta,
            status,
            scheduler,
        })
    }

    /// Feed a host notification into the scheduler. Returns whether a run was
    /// (or already is) scheduled as a result.
    pub fn handle(&self, trigger: Trigger) -> bool {
        let label = trigger.label();
        if !self.settings.precache_enabled() {
            debug!(target: "precache::scheduler", trigger = label, "precache disabled; ignoring trigger");
            return false;
        }

        let mode = trigger.mode();
        match trigger {
            Trigger::FilesChanged(paths) => {
                // Repeats of pending paths still push the quiet period back.
                if self.delta.record_changed(paths).eligible == 0 {
                    return false;
                }
            }
            _ => debug!(target: "precache::scheduler", trigger = label, "full rescan requested"),
        }
        self.scheduler.trigger(mode)
    }

    /// Record changed paths and schedule a delta run if any were eligible.
    pub fn record_changed<I, P>(&self, paths: I) -> bool
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let paths = paths.into_iter().map(Into::into).collect();
        self.handle(Trigger::FilesChanged(paths))
    }

    pub fn run_now(&self) -> bool {
        self.handle(Trigger::Manual)
    }

    pub fn snapshot(&self) -> RunStatus {
        self.status.snapshot()
    }

    pub fn scheduler(&self) -> &CoalescingScheduler {
        &self.scheduler
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    pub fn pending_delta(&self) -> usize {
        self.delta.len()
    }

    /// Cancel in-flight work, wait up to the configured grace period, then
    /// drop any delta paths that were never drained.
    pub async fn shutdown(&self) -> ShutdownReport {
        info!(target: "precache::scheduler", "shutting down precache engine");
        let report = self.scheduler.shutdown(self.config.shutdown_grace()).await;
        let discarded = self.delta.clear();
        if discarded > 0 {
            debug!(target: "precache::scheduler", discarded, "discarded undrained delta paths");
        }
        report
    }
}

/// Status bookkeeping for one executed run, from the end of debounce until
/// the pipeline returns. Dropping it unfinished (aborted task) still ends
/// the run.
struct ActiveRun<'a> {
    status: &'a StatusPublisher,
    finished: bool,
}

impl<'a> ActiveRun<'a> {
    fn open(status: &'a StatusPublisher, mode: RunMode) -> Self {
        status.open_run(mode);
        Self {
            status,
            finished: false,
        }
    }

    fn finish(mut self, text: impl Into<String>) {
        self.status.finish_run(text);
        self.finished = true;
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.status.finish_run("Failed: run aborted");
        }
    }
}

/// Final status text for a run that ended with `outcome`.
fn final_status(outcome: &RunOutcome) -> String {
    match outcome {
        RunOutcome::Completed { skipped: 0, .. } => "Completed".to_string(),
        RunOutcome::Completed { skipped, .. } => format!("Completed, {skipped} skipped"),
        RunOutcome::NothingToDo => STATUS_UP_TO_DATE.to_string(),
        RunOutcome::NoEnabledContent => STATUS_NO_ROOTS.to_string(),
        RunOutcome::Unavailable => STATUS_UNAVAILABLE.to_string(),
        RunOutcome::Disabled => STATUS_DISABLED.to_string(),
        RunOutcome::Cancelled => STATUS_CANCELLED.to_string(),
        RunOutcome::Failed(reason) => format!("Failed: {reason}"),
    }
}

enum FullCandidates {
    Found(HashSet<PathBuf>),
    NoRoots,
    Unavailable,
}

pub(crate) struct RunPipeline {
    config: EngineConfig,
    settings: SettingsHandle,
    roots: Arc<dyn ModRootResolver>,
    planner: FullScanPlanner,
    delta: Arc<DeltaAccumulator>,
    cache: Arc<dyn ContentCache>,
    orchestrator: Arc<dyn UploadOrchestrator>,
    status: Arc<StatusPublisher>,
}

#[async_trait]
impl RunExecutor for RunPipeline {
    async fn execute(&self, mode: RunMode, cancel: CancellationToken) -> RunOutcome {
        if !self.settings.precache_enabled() {
            debug!(target: "precache::run", %mode, "precache disabled; run skipped");
            return RunOutcome::Disabled;
        }

        let active = ActiveRun::open(&self.status, mode);
        let outcome = match AssertUnwindSafe(self.run(mode, &cancel)).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(PrecacheError::Cancelled(stage))) => {
                info!(target: "precache::run", %mode, %stage, "run cancelled");
                RunOutcome::Cancelled
            }
            Ok(Err(err)) => {
                warn!(target: "precache::run", %mode, error = %err, "run failed");
                RunOutcome::Failed(err.to_string())
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                warn!(target: "precache::run", %mode, %reason, "run panicked");
                RunOutcome::Failed(reason)
            }
        };
        active.finish(final_status(&outcome));
        outcome
    }
}

impl RunPipeline {
    async fn run(&self, mode: RunMode, cancel: &CancellationToken) -> Result<RunOutcome> {
        let mut run = ScanRun::new(mode);
        run.candidate_paths = match mode {
            RunMode::Full => match self.plan_full(cancel).await? {
                FullCandidates::Found(paths) => paths,
                FullCandidates::NoRoots => return Ok(RunOutcome::NoEnabledContent),
                FullCandidates::Unavailable => return Ok(RunOutcome::Unavailable),
            },
            RunMode::Delta => self.delta.drain(),
        };
        info!(target: "precache::run", %mode, candidates = run.candidate_paths.len(), "candidate paths collected");

        if run.candidate_paths.is_empty() {
            return Ok(RunOutcome::NothingToDo);
        }

        run.resolved_hashes = self.resolve_hashes(&run, cancel).await?;
        if run.resolved_hashes.is_empty() {
            return Ok(RunOutcome::NothingToDo);
        }

        Ok(self.upload(run, cancel).await)
    }

    async fn plan_full(&self, cancel: &CancellationToken) -> Result<FullCandidates> {
        let resolved = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(PrecacheError::Cancelled("resolving enabled roots".into()));
            }
            resolved = self.roots.enabled_roots() => resolved,
        };
        let roots = match resolved {
            Ok(roots) => roots,
            Err(err) => {
                warn!(target: "precache::run", error = %err, "enabled roots unavailable");
                return Ok(FullCandidates::Unavailable);
            }
        };
        if roots.is_empty() {
            return Ok(FullCandidates::NoRoots);
        }

        let plan = self
            .planner
            .plan(&roots, &self.settings.current_rule(), cancel)
            .await;
        if plan.interrupted {
            return Err(PrecacheError::Cancelled("full scan interrupted".into()));
        }
        if plan.report.roots_missing == roots.len() {
            return Ok(FullCandidates::Unavailable);
        }
        if plan.report.directories_skipped > 0 {
            debug!(
                target: "precache::run",
                skipped = plan.report.directories_skipped,
                "some directories could not be listed"
            );
        }
        Ok(FullCandidates::Found(plan.candidates))
    }

    async fn resolve_hashes(
        &self,
        run: &ScanRun,
        cancel: &CancellationToken,
    ) -> Result<HashSet<ContentHash>> {
        let paths: Vec<PathBuf> = run.candidate_paths.iter().cloned().collect();
        let resolved = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(PrecacheError::Cancelled("hash resolution".into()));
            }
            resolved = self.cache.resolve(paths) => resolved?,
        };

        let mut unknown_keys = 0usize;
        let mut hashes = HashSet::with_capacity(resolved.len());
        for (path, hash) in resolved {
            if !run.candidate_paths.contains(&path) {
                unknown_keys += 1;
            }
            if let Some(hash) = hash {
                hashes.insert(hash);
            }
        }
        if unknown_keys > 0 {
            debug!(
                target: "precache::run",
                mode = %run.mode,
                unknown_keys,
                "cache answered with paths outside the candidate set"
            );
        }
        debug!(
            target: "precache::run",
            mode = %run.mode,
            paths = run.candidate_paths.len(),
            hashes = hashes.len(),
            "hashes resolved"
        );
        Ok(hashes)
    }

    async fn upload(&self, run: ScanRun, cancel: &CancellationToken) -> RunOutcome {
        let submitted = run.resolved_hashes.len();
        self.status.begin_run(run.mode, submitted);

        if !self.wait_until_ready(cancel).await {
            return RunOutcome::Cancelled;
        }

        self.status
            .update_status(format!("Uploading {submitted} files"));
        let progress = {
            let text_sink = Arc::clone(&self.status);
            let bytes_sink = Arc::clone(&self.status);
            UploadProgress::new(
                move |text| text_sink.update_status(text),
                move |bytes| bytes_sink.update_bytes(bytes),
            )
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.orchestrator.upload(run.resolved_hashes, progress, cancel.clone()) => Some(result),
        };

        match result {
            None | Some(Err(PrecacheError::Cancelled(_))) => {
                info!(target: "precache::run", mode = %run.mode, "upload cancelled");
                RunOutcome::Cancelled
            }
            Some(Err(err)) => {
                warn!(target: "precache::run", mode = %run.mode, error = %err, "upload failed");
                RunOutcome::Failed(err.to_string())
            }
            Some(Ok(undeliverable)) => {
                let skipped = undeliverable.len();
                info!(
                    target: "precache::run",
                    mode = %run.mode,
                    submitted,
                    skipped,
                    elapsed_ms = (chrono::Utc::now() - run.started_at).num_milliseconds(),
                    "upload finished"
                );
                RunOutcome::Completed { submitted, skipped }
            }
        }
    }

    /// Poll the orchestrator until it accepts work. Returns false if cancelled.
    async fn wait_until_ready(&self, cancel: &CancellationToken) -> bool {
        let mut announced = false;
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            if self.orchestrator.is_ready().await {
                return true;
            }
            if !announced {
                self.status.update_status(STATUS_WAITING);
                announced = true;
            }
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = sleep(self.config.ready_poll_interval()) => {}
            }
        }
    }
}
