use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use modcache_config::{ConfigSource, ModcacheConfig};
use modcache_core::fs::RealFs;
use modcache_core::planner::FullScanPlanner;
use modcache_core::ports::StaticRootResolver;
use modcache_core::{EngineDeps, PrecacheEngine, RunMode, RunStatus, SettingsHandle, Trigger};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod store;
mod watch;

use store::{BlobIndex, DirectoryStore, Sha256ContentCache};
use watch::{FsWatchConfig, RootWatch};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "modcachectl")]
#[command(about = "Mirror enabled mod content into a content-addressed store")]
struct Cli {
    /// Config file (TOML or JSON). Defaults to $MODCACHE_CONFIG_PATH,
    /// $MODCACHE_CONFIG_JSON, then ./modcache.toml and friends.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one full precache pass and print the final status
    Sync,
    /// Full pass at startup, then delta passes on file changes until Ctrl-C
    Watch,
    /// Print the eligible candidate files without hashing or uploading
    Plan,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Override via RUST_LOG.
                "info,precache::scheduler=info,precache::run=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Sync => run_sync(config).await,
        Command::Watch => run_watch(config).await,
        Command::Plan => run_plan(config).await,
    }
}

fn load_config(explicit: Option<&std::path::Path>) -> anyhow::Result<ModcacheConfig> {
    if let Some(path) = explicit {
        let config = ModcacheConfig::load_from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?;
        info!(path = %path.display(), "config loaded from --config");
        return Ok(config);
    }

    let (config, source) = ModcacheConfig::load_from_env().context("failed to load configuration")?;
    match &source {
        ConfigSource::EnvPath(path) => info!(path = %path.display(), "config loaded from env path"),
        ConfigSource::EnvInline => info!("config loaded from inline environment json"),
        ConfigSource::File(path) => info!(path = %path.display(), "config loaded from file"),
        ConfigSource::Default => info!("no config found; using defaults"),
    }
    Ok(config)
}

fn build_engine(config: &ModcacheConfig) -> anyhow::Result<PrecacheEngine> {
    let index = BlobIndex::new();
    let deps = EngineDeps {
        settings: SettingsHandle::new(config.settings.clone()),
        roots: Arc::new(StaticRootResolver::new(config.roots.clone())),
        fs: Arc::new(RealFs::new()),
        cache: Arc::new(Sha256ContentCache::new(index.clone())),
        orchestrator: Arc::new(DirectoryStore::new(config.store_dir.clone(), index)),
    };
    PrecacheEngine::new(deps, config.engine).context("failed to start precache engine")
}

fn print_status(status: &RunStatus) -> anyhow::Result<()> {
    let rendered = serde_json::to_string_pretty(status).context("failed to render status")?;
    println!("{rendered}");
    Ok(())
}

async fn run_sync(config: ModcacheConfig) -> anyhow::Result<()> {
    let engine = build_engine(&config)?;
    if !engine.run_now() {
        warn!("precache is disabled; nothing to do");
        return print_status(&engine.snapshot());
    }

    tokio::select! {
        _ = engine.scheduler().wait_for_idle(RunMode::Full) => {}
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for ctrl-c")?;
            info!("interrupted; cancelling run");
        }
    }

    let report = engine.shutdown().await;
    if !report.timed_out.is_empty() {
        warn!(modes = ?report.timed_out, "runs did not stop within the grace period");
    }
    print_status(&engine.snapshot())
}

async fn run_watch(config: ModcacheConfig) -> anyhow::Result<()> {
    let engine = Arc::new(build_engine(&config)?);
    let watch = RootWatch::start(
        Arc::clone(&engine),
        config.roots.clone(),
        FsWatchConfig::default(),
    )?;
    engine.handle(Trigger::InitializationComplete);
    info!(roots = config.roots.len(), "watching for changes; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested");

    watch.stop();
    let report = engine.shutdown().await;
    if !report.timed_out.is_empty() {
        warn!(modes = ?report.timed_out, "runs did not stop within the grace period");
    }
    print_status(&engine.snapshot())
}

async fn run_plan(config: ModcacheConfig) -> anyhow::Result<()> {
    let planner = FullScanPlanner::new(Arc::new(RealFs::new()));
    let plan = planner
        .plan(
            &config.roots,
            &config.settings.rule(),
            &CancellationToken::new(),
        )
        .await;

    let mut candidates: Vec<_> = plan.candidates.into_iter().collect();
    candidates.sort();
    for path in &candidates {
        println!("{}", path.display());
    }
    info!(
        candidates = candidates.len(),
        files_seen = plan.report.files_seen,
        directories_skipped = plan.report.directories_skipped,
        roots_missing = plan.report.roots_missing,
        "plan complete"
    );
    Ok(())
}
