//! # Modcache Core
//!
//! Background engine that mirrors locally enabled mod content into a remote
//! content-addressed store so peers can fetch it while the origin client is
//! offline.
//!
//! ## Overview
//!
//! - **Eligibility**: extension allow-list plus case-insensitive exclusion
//!   substrings, re-read from live settings on every use
//! - **Planning**: full enumeration of enabled roots, or the drained set of
//!   paths changed since the previous delta run
//! - **Scheduling**: per-mode debounce so a burst of notifications collapses
//!   into one run, with at most one run of each mode in flight
//! - **Upload**: path -> hash resolution through a [`ports::ContentCache`],
//!   then one distinct hash set per run to a [`ports::UploadOrchestrator`]
//! - **Status**: a lock-guarded [`status::RunStatus`] snapshot for observers
//!
//! Hashing, transport, filesystem watching and root discovery are supplied
//! by the host through the traits in [`ports`].
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use modcache_core::{
//!     EngineConfig, EngineDeps, PrecacheEngine, SettingsHandle, Trigger,
//!     fs::RealFs,
//!     ports::{ContentCache, StaticRootResolver, UploadOrchestrator},
//! };
//!
//! async fn start(
//!     cache: Arc<dyn ContentCache>,
//!     orchestrator: Arc<dyn UploadOrchestrator>,
//! ) -> modcache_core::Result<PrecacheEngine> {
//!     let engine = PrecacheEngine::new(
//!         EngineDeps {
//!             settings: SettingsHandle::default(),
//!             roots: Arc::new(StaticRootResolver::new(vec!["/games/mods".into()])),
//!             fs: Arc::new(RealFs::new()),
//!             cache,
//!             orchestrator,
//!         },
//!         EngineConfig::default(),
//!     )?;
//!     engine.handle(Trigger::InitializationComplete);
//!     Ok(engine)
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod config;
pub mod delta;
pub mod eligibility;
pub mod engine;
pub mod error;
pub mod fs;
pub mod planner;
pub mod ports;
pub mod scheduler;
pub mod status;
pub mod types;

pub use config::{EngineConfig, PrecacheSettings, SettingsHandle};
pub use engine::{EngineDeps, PrecacheEngine};
pub use error::{PrecacheError, Result};
pub use scheduler::{CoalescingScheduler, RunPhase, ShutdownReport};
pub use status::{RunStatus, StatusPublisher};
pub use types::{ContentHash, RunMode, RunOutcome, ScanRun, Trigger};
