//! Coalescing run scheduler.
//!
//! Each [`RunMode`] has its own slot moving through
//! `Idle -> Debouncing -> Running -> Idle`. A trigger in `Idle` spawns the
//! slot's task; triggers while `Debouncing` only push the quiet period back;
//! triggers while `Running` set a rerun flag that sends the same task back
//! into `Debouncing` once the current run returns. A mode therefore never has
//! two runs in flight, while full and delta slots run independently.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{PrecacheError, Result};
use crate::types::{RunMode, RunOutcome};

/// Executes one run of the given mode once debounce has settled.
#[async_trait]
pub trait RunExecutor: Send + Sync + 'static {
    async fn execute(&self, mode: RunMode, cancel: CancellationToken) -> RunOutcome;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RunPhase {
    Idle,
    Debouncing,
    Running,
}

struct ModeSlot {
    phase: RunPhase,
    phase_tx: watch::Sender<RunPhase>,
    last_trigger: Instant,
    burst_started: Instant,
    rerun_requested: bool,
    runs_completed: u64,
    handle: Option<JoinHandle<()>>,
}

impl ModeSlot {
    fn new() -> Self {
        let now = Instant::now();
        let (phase_tx, _) = watch::channel(RunPhase::Idle);
        Self {
            phase: RunPhase::Idle,
            phase_tx,
            last_trigger: now,
            burst_started: now,
            rerun_requested: false,
            runs_completed: 0,
            handle: None,
        }
    }

    fn set_phase(&mut self, phase: RunPhase) {
        self.phase = phase;
        self.phase_tx.send_replace(phase);
    }
}

impl fmt::Debug for ModeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModeSlot")
            .field("phase", &self.phase)
            .field("rerun_requested", &self.rerun_requested)
            .field("runs_completed", &self.runs_completed)
            .field(
                "task_finished",
                &self.handle.as_ref().map(|handle| handle.is_finished()),
            )
            .finish()
    }
}

struct SchedulerInner {
    executor: Arc<dyn RunExecutor>,
    config: EngineConfig,
    cancel: CancellationToken,
    runtime: Handle,
    slots: Mutex<HashMap<RunMode, ModeSlot>>,
}

/// What shutdown observed while waiting for in-flight runs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub stopped: Vec<RunMode>,
    pub timed_out: Vec<RunMode>,
}

#[derive(Clone)]
pub struct CoalescingScheduler {
    inner: Arc<SchedulerInner>,
}

impl fmt::Debug for CoalescingScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("CoalescingScheduler");
        debug
            .field("config", &self.inner.config)
            .field("cancelled", &self.inner.cancel.is_cancelled());
        match self.inner.slots.try_lock() {
            Some(slots) => debug.field("slots", &*slots),
            None => debug.field("slots", &"<locked>"),
        };
        debug.finish()
    }
}

impl CoalescingScheduler {
    /// Must be called from within a tokio runtime; the runtime handle is kept
    /// so triggers may later arrive from arbitrary threads.
    pub fn new(
        executor: Arc<dyn RunExecutor>,
        config: EngineConfig,
        cancel: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|err| {
            PrecacheError::Internal(format!("scheduler requires a tokio runtime: {err}"))
        })?;

        let slots = RunMode::ALL
            .into_iter()
            .map(|mode| (mode, ModeSlot::new()))
            .collect();

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                executor,
                config,
                cancel,
                runtime,
                slots: Mutex::new(slots),
            }),
        })
    }

    /// Register a trigger for `mode`. Returns false once shutdown has begun.
    pub fn trigger(&self, mode: RunMode) -> bool {
        if self.inner.cancel.is_cancelled() {
            debug!(target: "precache::scheduler", %mode, "trigger ignored after shutdown");
            return false;
        }

        let mut slots = self.inner.slots.lock();
        let slot = slots.entry(mode).or_insert_with(ModeSlot::new);
        let now = Instant::now();
        slot.last_trigger = now;

        match slot.phase {
            RunPhase::Idle => {
                slot.burst_started = now;
                slot.rerun_requested = false;
                slot.set_phase(RunPhase::Debouncing);
                let inner = Arc::clone(&self.inner);
                slot.handle = Some(self.inner.runtime.spawn(drive_mode(inner, mode)));
                debug!(target: "precache::scheduler", %mode, "debounce started");
            }
            RunPhase::Debouncing => {}
            RunPhase::Running => {
                slot.rerun_requested = true;
                debug!(target: "precache::scheduler", %mode, "rerun requested while running");
            }
        }
        true
    }

    pub fn phase(&self, mode: RunMode) -> RunPhase {
        self.inner
            .slots
            .lock()
            .get(&mode)
            .map(|slot| slot.phase)
            .unwrap_or(RunPhase::Idle)
    }

    pub fn is_active(&self, mode: RunMode) -> bool {
        self.phase(mode) != RunPhase::Idle
    }

    pub fn runs_completed(&self, mode: RunMode) -> u64 {
        self.inner
            .slots
            .lock()
            .get(&mode)
            .map(|slot| slot.runs_completed)
            .unwrap_or(0)
    }

    pub fn subscribe(&self, mode: RunMode) -> watch::Receiver<RunPhase> {
        let mut slots = self.inner.slots.lock();
        slots
            .entry(mode)
            .or_insert_with(ModeSlot::new)
            .phase_tx
            .subscribe()
    }

    /// Resolve once `mode` has gone back to `Idle`.
    pub async fn wait_for_idle(&self, mode: RunMode) {
        let mut rx = self.subscribe(mode);
        let _ = rx.wait_for(|phase| *phase == RunPhase::Idle).await;
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Cancel everything and give each in-flight task `grace` to wind down.
    /// Tasks that overrun are left to observe cancellation on their own.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        self.inner.cancel.cancel();

        let handles: Vec<(RunMode, JoinHandle<()>)> = {
            let mut slots = self.inner.slots.lock();
            slots
                .iter_mut()
                .filter_map(|(mode, slot)| slot.handle.take().map(|handle| (*mode, handle)))
                .collect()
        };

        let mut report = ShutdownReport::default();
        for (mode, handle) in handles {
            match timeout(grace, handle).await {
                Ok(Ok(())) => report.stopped.push(mode),
                Ok(Err(err)) => {
                    warn!(target: "precache::scheduler", %mode, error = %err, "run task ended abnormally");
                    report.stopped.push(mode);
                }
                Err(_) => {
                    warn!(target: "precache::scheduler", %mode, ?grace, "run task did not stop within grace period");
                    report.timed_out.push(mode);
                }
            }
        }
        report
    }
}

async fn drive_mode(inner: Arc<SchedulerInner>, mode: RunMode) {
    loop {
        if !inner.debounce(mode).await {
            inner.settle(mode, RunPhase::Idle);
            debug!(target: "precache::scheduler", %mode, "debounce abandoned on shutdown");
            return;
        }

        let outcome = AssertUnwindSafe(inner.executor.execute(mode, inner.cancel.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| RunOutcome::Failed(panic_message(panic.as_ref())));

        match &outcome {
            RunOutcome::Failed(reason) => {
                warn!(target: "precache::scheduler", %mode, %reason, "run failed");
            }
            other => {
                info!(target: "precache::scheduler", %mode, outcome = ?other, "run finished");
            }
        }

        let mut slots = inner.slots.lock();
        let slot = slots.entry(mode).or_insert_with(ModeSlot::new);
        slot.runs_completed += 1;
        if slot.rerun_requested && !inner.cancel.is_cancelled() {
            slot.rerun_requested = false;
            slot.burst_started = Instant::now();
            slot.set_phase(RunPhase::Debouncing);
            debug!(target: "precache::scheduler", %mode, "picking up trigger received during run");
            continue;
        }
        slot.rerun_requested = false;
        slot.set_phase(RunPhase::Idle);
        return;
    }
}

impl SchedulerInner {
    /// Sleep in debounce-window steps until a full window passes with no new
    /// trigger, or the burst exceeds the deferral ceiling. Returns false when
    /// cancelled first.
    async fn debounce(&self, mode: RunMode) -> bool {
        let window = self.config.debounce_window();
        let ceiling = self.config.max_deferral();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = sleep(window) => {}
            }

            let mut slots = self.slots.lock();
            let slot = slots.entry(mode).or_insert_with(ModeSlot::new);
            let now = Instant::now();
            let quiet = now.duration_since(slot.last_trigger) >= window;
            let overdue =
                ceiling.is_some_and(|ceiling| now.duration_since(slot.burst_started) >= ceiling);

            if quiet || overdue {
                if !quiet {
                    debug!(target: "precache::scheduler", %mode, "deferral ceiling reached; running despite ongoing triggers");
                }
                slot.rerun_requested = false;
                slot.set_phase(RunPhase::Running);
                return true;
            }
        }
    }

    fn settle(&self, mode: RunMode, phase: RunPhase) {
        let mut slots = self.slots.lock();
        let slot = slots.entry(mode).or_insert_with(ModeSlot::new);
        slot.rerun_requested = false;
        slot.set_phase(phase);
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}
