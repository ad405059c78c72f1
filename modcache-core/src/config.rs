use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::eligibility::{EligibilityRule, RuleSource, default_asset_extensions_vec};
use crate::error::{PrecacheError, Result};

/// User-facing precache settings.
///
/// These are owned by whoever hosts the engine and may change at any time;
/// the engine re-reads them through a [`SettingsHandle`] on every filter call.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PrecacheSettings {
    /// Master switch. Triggers are ignored while this is off.
    pub precache_enabled: bool,
    /// Case-insensitive substrings; any match excludes the path.
    pub excluded_patterns: Vec<String>,
    /// File extensions eligible for caching, with or without a leading dot.
    pub allowed_extensions: Vec<String>,
}

impl Default for PrecacheSettings {
    fn default() -> Self {
        Self {
            precache_enabled: true,
            excluded_patterns: Vec::new(),
            allowed_extensions: default_asset_extensions_vec(),
        }
    }
}

impl PrecacheSettings {
    pub fn rule(&self) -> EligibilityRule {
        EligibilityRule::new(&self.allowed_extensions, &self.excluded_patterns)
    }
}

/// Live, shared view of [`PrecacheSettings`].
#[derive(Clone, Debug, Default)]
pub struct SettingsHandle {
    inner: Arc<RwLock<PrecacheSettings>>,
}

impl SettingsHandle {
    pub fn new(settings: PrecacheSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn get(&self) -> PrecacheSettings {
        self.inner.read().clone()
    }

    pub fn replace(&self, settings: PrecacheSettings) {
        *self.inner.write() = settings;
    }

    pub fn update(&self, apply: impl FnOnce(&mut PrecacheSettings)) {
        let mut guard = self.inner.write();
        apply(&mut guard);
    }

    pub fn precache_enabled(&self) -> bool {
        self.inner.read().precache_enabled
    }
}

impl RuleSource for SettingsHandle {
    fn current_rule(&self) -> EligibilityRule {
        self.inner.read().rule()
    }
}

/// Timing knobs for the scheduler and run pipeline.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Quiet period a burst of triggers must observe before a run starts.
    pub debounce_window_ms: u64,
    /// Upper bound on how long a continuous burst may keep deferring a run.
    /// `0` disables the ceiling.
    pub max_deferral_ms: u64,
    /// Poll cadence while waiting for the upload orchestrator to become ready.
    pub ready_poll_interval_ms: u64,
    /// How long shutdown waits for each in-flight run.
    pub shutdown_grace_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_window_ms: 2_000,
            max_deferral_ms: 30_000,
            ready_poll_interval_ms: 500,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl EngineConfig {
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }

    pub fn max_deferral(&self) -> Option<Duration> {
        (self.max_deferral_ms > 0).then(|| Duration::from_millis(self.max_deferral_ms))
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.debounce_window_ms == 0 {
            return Err(PrecacheError::Config(
                "debounce_window_ms must be greater than zero".into(),
            ));
        }
        if self.max_deferral_ms != 0 && self.max_deferral_ms < self.debounce_window_ms {
            return Err(PrecacheError::Config(format!(
                "max_deferral_ms ({}) must be 0 or at least debounce_window_ms ({})",
                self.max_deferral_ms, self.debounce_window_ms
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn handle_reflects_live_changes() {
        let handle = SettingsHandle::new(PrecacheSettings {
            precache_enabled: true,
            excluded_patterns: vec![],
            allowed_extensions: vec!["mdl".into()],
        });
        assert!(handle.current_rule().matches(Path::new("/mods/a.mdl")));

        handle.update(|settings| settings.excluded_patterns.push("mods".into()));
        assert!(!handle.current_rule().matches(Path::new("/mods/a.mdl")));
    }

    #[test]
    fn ceiling_below_debounce_is_rejected() {
        let config = EngineConfig {
            debounce_window_ms: 500,
            max_deferral_ms: 100,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        let unbounded = EngineConfig {
            max_deferral_ms: 0,
            ..config
        };
        assert!(unbounded.validate().is_ok());
        assert_eq!(unbounded.max_deferral(), None);
    }
}
