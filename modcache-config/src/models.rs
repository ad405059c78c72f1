use anyhow::Context;
use modcache_core::{EngineConfig, PrecacheSettings};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

use crate::error::ConfigLoadError;

pub const CONFIG_PATH_VAR: &str = "MODCACHE_CONFIG_PATH";
pub const CONFIG_JSON_VAR: &str = "MODCACHE_CONFIG_JSON";

const CANDIDATES: &[&str] = &[
    "modcache.toml",
    "modcache.json",
    "config/modcache.toml",
    "config/modcache.json",
];

fn default_store_dir() -> PathBuf {
    PathBuf::from("modcache-store")
}

/// Source that produced the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

/// Everything a host needs to stand up a precache engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ModcacheConfig {
    /// Live precache settings: master switch, exclusions and allowed
    /// extensions. Hosts may keep mutating these after startup.
    pub settings: PrecacheSettings,
    /// Debounce, deferral ceiling, readiness polling and shutdown grace.
    pub engine: EngineConfig,
    /// Enabled mod roots. An empty list means there is nothing to cache.
    pub roots: Vec<PathBuf>,
    /// Directory backing the content-addressed store.
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
}

impl Default for ModcacheConfig {
    fn default() -> Self {
        Self {
            settings: PrecacheSettings::default(),
            engine: EngineConfig::default(),
            roots: Vec::new(),
            store_dir: default_store_dir(),
        }
    }
}

impl ModcacheConfig {
    /// Load configuration using environment variables.
    /// Evaluation order:
    /// 1) `$MODCACHE_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$MODCACHE_CONFIG_JSON` (inline JSON),
    /// 3) the first existing default candidate file,
    /// 4) defaults.
    pub fn load_from_env() -> anyhow::Result<(Self, ConfigSource)> {
        Self::load_with(|key| env::var(key).ok(), Path::new("."))
    }

    /// Same as [`Self::load_from_env`] with an explicit variable lookup and
    /// base directory for the candidate files.
    pub fn load_with<F>(lookup: F, base: &Path) -> anyhow::Result<(Self, ConfigSource)>
    where
        F: Fn(&str) -> Option<String>,
    {
        match lookup(CONFIG_PATH_VAR) {
            Some(path_str) if !path_str.trim().is_empty() => {
                let path = PathBuf::from(path_str);
                info!(path = %path.display(), "loading config from {CONFIG_PATH_VAR}");
                let config = Self::load_from_file(&path)
                    .with_context(|| format!("failed to load {CONFIG_PATH_VAR}"))?;
                return Ok((config, ConfigSource::EnvPath(path)));
            }
            Some(_) => debug!("{CONFIG_PATH_VAR} is blank; ignoring"),
            None => {}
        }

        match lookup(CONFIG_JSON_VAR) {
            Some(raw) if !raw.trim().is_empty() => {
                info!("loading inline config from {CONFIG_JSON_VAR}");
                let parsed = Self::parse_json(&raw)
                    .with_context(|| format!("failed to parse {CONFIG_JSON_VAR}"))?;
                return Ok((parsed, ConfigSource::EnvInline));
            }
            Some(_) => debug!("{CONFIG_JSON_VAR} is blank; ignoring"),
            None => {}
        }

        if let Some(path) = Self::find_default_file(base) {
            info!(path = %path.display(), "loading config file");
            let config = Self::load_from_file(&path)?;
            return Ok((config, ConfigSource::File(path)));
        }

        info!(base = %base.display(), "no config found; using defaults");
        Ok((Self::default(), ConfigSource::Default))
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigLoadError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents).map_err(ConfigLoadError::Json)?,
            Some("toml") | Some("tml") => {
                toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
                    origin: path.display().to_string(),
                    message: err.to_string(),
                })?
            }
            _ => return Self::parse_from_str(&contents, &path.display().to_string()),
        };
        config.validated()
    }

    pub fn parse_from_str(contents: &str, origin: &str) -> Result<Self, ConfigLoadError> {
        // TOML first, then JSON.
        let config: Self = toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| ConfigLoadError::Parse {
                origin: origin.to_string(),
                message: format!("toml error: {toml_err}; json error: {json_err}"),
            })
        })?;
        config.validated()
    }

    pub fn parse_json(raw: &str) -> Result<Self, ConfigLoadError> {
        let config: Self = serde_json::from_str(raw).map_err(ConfigLoadError::Json)?;
        config.validated()
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        self.engine.validate().map_err(ConfigLoadError::Invalid)?;
        if self.store_dir.as_os_str().is_empty() {
            return Err(ConfigLoadError::EmptyStoreDir);
        }
        Ok(())
    }

    fn validated(self) -> Result<Self, ConfigLoadError> {
        self.validate()?;
        Ok(self)
    }

    fn find_default_file(base: &Path) -> Option<PathBuf> {
        CANDIDATES
            .iter()
            .map(|candidate| base.join(candidate))
            .find(|path| path.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn load_logs_skipped_sources_and_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let (_, source) = tracing::subscriber::with_default(subscriber, || {
            ModcacheConfig::load_with(
                |key| (key == CONFIG_PATH_VAR).then(|| "  ".to_string()),
                dir.path(),
            )
            .unwrap()
        });

        assert_eq!(source, ConfigSource::Default);
        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("MODCACHE_CONFIG_PATH is blank"));
        assert!(logs.contains("using defaults"));
    }

    #[test]
    fn defaults_are_valid() {
        let config = ModcacheConfig::default();
        config.validate().unwrap();
        assert!(config.settings.precache_enabled);
        assert!(config.roots.is_empty());
        assert_eq!(config.store_dir, PathBuf::from("modcache-store"));
    }

    #[test]
    fn blank_env_values_fall_through() {
        let dir = tempfile::tempdir().unwrap();
        let (config, source) = ModcacheConfig::load_with(
            |key| match key {
                CONFIG_PATH_VAR => Some("  ".into()),
                CONFIG_JSON_VAR => Some(String::new()),
                _ => None,
            },
            dir.path(),
        )
        .unwrap();
        assert_eq!(source, ConfigSource::Default);
        assert_eq!(config, ModcacheConfig::default());
    }
}
