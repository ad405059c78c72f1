//! Filesystem watch wiring for `modcachectl watch`.
//!
//! Raw `notify` events are batched briefly and handed to the engine as
//! changed paths. Watcher errors fall back to a full rescan.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use modcache_core::{PrecacheEngine, Trigger};
use notify::event::{EventKind, ModifyKind};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};
use tracing::{debug, warn};

#[derive(Clone, Debug)]
pub struct FsWatchConfig {
    /// Window for collecting a burst of notify events into one hand-off.
    pub batch_window: Duration,
    /// Maximum number of paths per hand-off.
    pub max_batch_paths: usize,
    pub channel_capacity: usize,
}

impl Default for FsWatchConfig {
    fn default() -> Self {
        Self {
            batch_window: Duration::from_millis(250),
            max_batch_paths: 1024,
            channel_capacity: 4096,
        }
    }
}

enum WatchMessage {
    Event(Event),
    Error(String),
}

impl fmt::Debug for WatchMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchMessage::Event(event) => f
                .debug_struct("WatchMessage::Event")
                .field("kind", &event.kind)
                .field("path_count", &event.paths.len())
                .finish(),
            WatchMessage::Error(message) => f
                .debug_struct("WatchMessage::Error")
                .field("message", message)
                .finish(),
        }
    }
}

/// Live watchers plus the task feeding the engine. Dropping the watchers
/// stops the notify streams.
pub struct RootWatch {
    watchers: Vec<RecommendedWatcher>,
    forward_task: JoinHandle<()>,
}

impl fmt::Debug for RootWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootWatch")
            .field("watcher_count", &self.watchers.len())
            .field("forward_task_finished", &self.forward_task.is_finished())
            .finish()
    }
}

impl RootWatch {
    pub fn start(
        engine: Arc<PrecacheEngine>,
        roots: Vec<PathBuf>,
        config: FsWatchConfig,
    ) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let watchers = init_watchers(resolve_roots(roots), tx)?;
        let forward_task = spawn_forward_loop(engine, rx, config);
        Ok(Self {
            watchers,
            forward_task,
        })
    }

    pub fn stop(self) {
        drop(self.watchers);
        self.forward_task.abort();
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Name(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Any
    )
}

fn spawn_forward_loop(
    engine: Arc<PrecacheEngine>,
    mut rx: mpsc::Receiver<WatchMessage>,
    config: FsWatchConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut pending: Vec<PathBuf> = Vec::new();

        loop {
            let msg = if pending.is_empty() {
                rx.recv().await
            } else {
                match timeout(config.batch_window, rx.recv()).await {
                    Ok(msg) => msg,
                    Err(_) => {
                        forward(&engine, &mut pending);
                        continue;
                    }
                }
            };

            let Some(msg) = msg else {
                forward(&engine, &mut pending);
                break;
            };

            match msg {
                WatchMessage::Event(event) => {
                    if !is_content_change(&event.kind) {
                        continue;
                    }
                    pending.extend(event.paths);
                    if pending.len() >= config.max_batch_paths {
                        forward(&engine, &mut pending);
                    }
                }
                WatchMessage::Error(error) => {
                    warn!(target: "precache::delta", %error, "watcher error; requesting full rescan");
                    engine.handle(Trigger::ContentRootChanged);
                }
            }
        }
    })
}

fn forward(engine: &PrecacheEngine, pending: &mut Vec<PathBuf>) {
    if pending.is_empty() {
        return;
    }
    let batch = std::mem::take(pending);
    let count = batch.len();
    let scheduled = engine.record_changed(batch);
    debug!(target: "precache::delta", paths = count, scheduled, "forwarded watcher batch");
}

fn resolve_roots(roots: Vec<PathBuf>) -> Vec<PathBuf> {
    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    roots
        .into_iter()
        .map(|path| if path.is_absolute() { path } else { cwd.join(path) })
        .collect()
}

fn init_watchers(
    roots: Vec<PathBuf>,
    watcher_tx: mpsc::Sender<WatchMessage>,
) -> anyhow::Result<Vec<RecommendedWatcher>> {
    let mut watchers = Vec::with_capacity(roots.len());
    for root_path in &roots {
        let path_clone = root_path.clone();
        let tx_event = watcher_tx.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if let Err(err) = tx_event.blocking_send(WatchMessage::Event(event)) {
                        warn!(
                            "watch channel send failed for {}: {}",
                            path_clone.display(),
                            err
                        );
                    }
                }
                Err(err) => {
                    let _ = tx_event.blocking_send(WatchMessage::Error(err.to_string()));
                }
            },
            NotifyConfig::default(),
        )
        .with_context(|| format!("failed to create watcher for {}", root_path.display()))?;

        watcher
            .watch(root_path, RecursiveMode::Recursive)
            .with_context(|| format!("failed to watch {}", root_path.display()))?;

        watchers.push(watcher);
    }

    Ok(watchers)
}
