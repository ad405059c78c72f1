use std::fs;
use std::path::PathBuf;

use modcache_config::{CONFIG_JSON_VAR, CONFIG_PATH_VAR, ConfigLoadError, ConfigSource, ModcacheConfig};
use modcache_core::EngineConfig;

const SAMPLE_TOML: &str = r#"
roots = ["/games/mods/body", "/games/mods/hair"]
store_dir = "/var/cache/modcache"

[settings]
precache_enabled = true
excluded_patterns = ["temp", "backup"]
allowed_extensions = [".mdl", "tex"]

[engine]
debounce_window_ms = 500
max_deferral_ms = 10000
"#;

#[test]
fn toml_file_overrides_and_fills_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("modcache.toml");
    fs::write(&path, SAMPLE_TOML).unwrap();

    let config = ModcacheConfig::load_from_file(&path).unwrap();
    assert_eq!(config.roots.len(), 2);
    assert_eq!(config.store_dir, PathBuf::from("/var/cache/modcache"));
    assert_eq!(config.settings.excluded_patterns, vec!["temp", "backup"]);
    assert_eq!(config.engine.debounce_window_ms, 500);
    assert_eq!(config.engine.max_deferral_ms, 10_000);
    assert_eq!(
        config.engine.shutdown_grace_ms,
        EngineConfig::default().shutdown_grace_ms
    );
}

#[test]
fn json_with_missing_sections_uses_defaults() {
    let config = ModcacheConfig::parse_json(r#"{ "roots": ["/mods"] }"#).unwrap();
    assert_eq!(config.roots, vec![PathBuf::from("/mods")]);
    assert_eq!(config.engine, EngineConfig::default());
    assert!(config.settings.precache_enabled);
    assert!(config.settings.allowed_extensions.iter().any(|ext| ext == "mdl"));
}

#[test]
fn unknown_extension_tries_toml_then_json() {
    let from_toml = ModcacheConfig::parse_from_str("roots = [\"/a\"]", "inline").unwrap();
    assert_eq!(from_toml.roots, vec![PathBuf::from("/a")]);

    let from_json = ModcacheConfig::parse_from_str(r#"{"roots":["/b"]}"#, "inline").unwrap();
    assert_eq!(from_json.roots, vec![PathBuf::from("/b")]);

    let err = ModcacheConfig::parse_from_str("roots = [", "inline").unwrap_err();
    assert!(matches!(err, ConfigLoadError::Parse { .. }));
}

#[test]
fn zero_debounce_is_rejected() {
    let err = ModcacheConfig::parse_json(r#"{ "engine": { "debounce_window_ms": 0 } }"#).unwrap_err();
    assert!(matches!(err, ConfigLoadError::Invalid(_)));
}

#[test]
fn ceiling_below_debounce_is_rejected() {
    let err = ModcacheConfig::parse_json(
        r#"{ "engine": { "debounce_window_ms": 5000, "max_deferral_ms": 1000 } }"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigLoadError::Invalid(_)));

    let unbounded = ModcacheConfig::parse_json(
        r#"{ "engine": { "debounce_window_ms": 5000, "max_deferral_ms": 0 } }"#,
    )
    .unwrap();
    assert_eq!(unbounded.engine.max_deferral(), None);
}

#[test]
fn missing_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let err = ModcacheConfig::load_from_file(&path).unwrap_err();
    match err {
        ConfigLoadError::Read { path: reported, .. } => assert_eq!(reported, path),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn env_path_wins_over_inline_json_and_candidates() {
    let dir = tempfile::tempdir().unwrap();
    let explicit = dir.path().join("explicit.json");
    fs::write(&explicit, r#"{ "roots": ["/explicit"] }"#).unwrap();
    fs::write(dir.path().join("modcache.toml"), "roots = [\"/candidate\"]").unwrap();
    let explicit_str = explicit.display().to_string();

    let (config, source) = ModcacheConfig::load_with(
        |key| match key {
            CONFIG_PATH_VAR => Some(explicit_str.clone()),
            CONFIG_JSON_VAR => Some(r#"{ "roots": ["/inline"] }"#.into()),
            _ => None,
        },
        dir.path(),
    )
    .unwrap();

    assert_eq!(source, ConfigSource::EnvPath(explicit));
    assert_eq!(config.roots, vec![PathBuf::from("/explicit")]);
}

#[test]
fn inline_json_wins_over_candidates() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("modcache.toml"), "roots = [\"/candidate\"]").unwrap();

    let (config, source) = ModcacheConfig::load_with(
        |key| (key == CONFIG_JSON_VAR).then(|| r#"{ "roots": ["/inline"] }"#.to_string()),
        dir.path(),
    )
    .unwrap();

    assert_eq!(source, ConfigSource::EnvInline);
    assert_eq!(config.roots, vec![PathBuf::from("/inline")]);
}

#[test]
fn candidate_file_under_config_dir_is_found() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("config")).unwrap();
    let candidate = dir.path().join("config").join("modcache.json");
    fs::write(&candidate, r#"{ "store_dir": "/blobs" }"#).unwrap();

    let (config, source) = ModcacheConfig::load_with(|_| None, dir.path()).unwrap();

    assert_eq!(source, ConfigSource::File(candidate));
    assert_eq!(config.store_dir, PathBuf::from("/blobs"));
}

#[test]
fn invalid_inline_json_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = ModcacheConfig::load_with(
        |key| (key == CONFIG_JSON_VAR).then(|| "{ not json".to_string()),
        dir.path(),
    );
    assert!(result.is_err());
}
