use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn write_config(dir: &Path, mods: &Path, store: &Path) -> std::path::PathBuf {
    let config = dir.join("modcache.toml");
    fs::write(
        &config,
        format!(
            "roots = [{mods:?}]\nstore_dir = {store:?}\n\n[settings]\nexcluded_patterns = [\"temp\"]\nallowed_extensions = [\"mdl\", \"tex\"]\n\n[engine]\ndebounce_window_ms = 20\n",
            mods = mods.display().to_string(),
            store = store.display().to_string(),
        ),
    )
    .unwrap();
    config
}

fn seed_mods(mods: &Path) {
    fs::create_dir_all(mods.join("body/temp")).unwrap();
    fs::write(mods.join("body/a.mdl"), b"model").unwrap();
    fs::write(mods.join("body/copy.mdl"), b"model").unwrap();
    fs::write(mods.join("body/b.tex"), b"texture").unwrap();
    fs::write(mods.join("body/temp/c.mdl"), b"scratch").unwrap();
    fs::write(mods.join("body/readme.txt"), b"notes").unwrap();
}

#[test]
fn help_lists_subcommands() {
    Command::cargo_bin("modcachectl")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("sync"))
        .stdout(predicate::str::contains("watch"))
        .stdout(predicate::str::contains("plan"));
}

#[test]
fn plan_prints_only_eligible_files() {
    let dir = tempfile::tempdir().unwrap();
    let mods = dir.path().join("mods");
    seed_mods(&mods);
    let config = write_config(dir.path(), &mods, &dir.path().join("store"));

    Command::cargo_bin("modcachectl")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("a.mdl"))
        .stdout(predicate::str::contains("b.tex"))
        .stdout(predicate::str::contains("c.mdl").not())
        .stdout(predicate::str::contains("readme.txt").not());
}

#[test]
fn sync_fills_the_store_with_distinct_blobs() {
    let dir = tempfile::tempdir().unwrap();
    let mods = dir.path().join("mods");
    let store = dir.path().join("store");
    seed_mods(&mods);
    let config = write_config(dir.path(), &mods, &store);

    Command::cargo_bin("modcachectl")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .arg("sync")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"is_uploading\": false"))
        .stdout(predicate::str::contains("Completed"));

    let blobs: Vec<_> = fs::read_dir(&store)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
        .collect();
    assert_eq!(blobs.len(), 2);
}

#[test]
fn invalid_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("bad.toml");
    fs::write(&config, "[engine]\ndebounce_window_ms = 0\n").unwrap();

    Command::cargo_bin("modcachectl")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .arg("plan")
        .assert()
        .failure();
}
