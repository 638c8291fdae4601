//! Command-line behavior of the wheelsmith binary

use crate::common::{sample_wheel, wheel_file_name, write_project};
use assert_cmd::{cargo::cargo_bin_cmd, Command};
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use wheelsmith::hash::Digest;

/// Isolated home with a config pointing the cache into it
struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self::with_config("")
    }

    fn with_config(extra: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let cache_root = dir.path().join("cache");
        let config = format!(
            "[general]\naudit_log = false\n\n[cache]\nroot = {:?}\n{}",
            cache_root.display().to_string(),
            extra
        );
        std::fs::write(dir.path().join("config.toml"), config).unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn config_path(&self) -> PathBuf {
        self.dir.path().join("config.toml")
    }

    fn cmd(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("wheelsmith");
        cmd.arg("--no-local")
            .arg("-c")
            .arg(self.config_path())
            .env("HOME", self.path())
            .env("XDG_CONFIG_HOME", self.path().join("xdg-config"))
            .env("XDG_STATE_HOME", self.path().join("xdg-state"))
            .env("XDG_CACHE_HOME", self.path().join("xdg-cache"))
            .env("CI", "true")
            .env_remove("RUST_LOG")
            .env_remove("WHEELSMITH_CONFIG");
        cmd
    }

    fn write_wheel(&self, payload: &str) -> PathBuf {
        let path = self.path().join(wheel_file_name("demo", "1.0"));
        std::fs::write(&path, sample_wheel("demo", "1.0", payload)).unwrap();
        path
    }
}

#[test]
fn help_displays() {
    cargo_bin_cmd!("wheelsmith")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("cached, verified Python wheel builds"));
}

#[test]
fn version_displays() {
    cargo_bin_cmd!("wheelsmith")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("wheelsmith"));
}

#[test]
fn completions_generate() {
    cargo_bin_cmd!("wheelsmith")
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("wheelsmith"));
}

#[test]
fn config_path_shows_override() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn config_show_includes_sections() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[cache]"))
        .stdout(predicate::str::contains("[registry]"));
}

#[test]
fn config_set_updates_file() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["config", "set", "cache.max_size_mb", "64"])
        .assert()
        .success();

    let content = std::fs::read_to_string(sandbox.config_path()).unwrap();
    assert!(content.contains("max_size_mb = 64"));
    assert!(content.contains("audit_log = false"));
}

#[test]
fn config_set_rejects_unknown_key() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["config", "set", "cache.colour", "blue"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cache.colour"));
}

#[test]
fn invalid_config_is_reported() {
    let sandbox = Sandbox::new();
    std::fs::write(sandbox.config_path(), "[cache]\nsize = 1\n").unwrap();
    sandbox
        .cmd()
        .args(["cache", "stats"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn cache_stats_json_on_empty_cache() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["cache", "stats", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"entry_count\": 0"));
}

#[test]
fn cache_insert_list_purge() {
    let sandbox = Sandbox::new();
    let wheel = sandbox.write_wheel("v = 1");
    let digest = Digest::of_file(&wheel).unwrap();

    sandbox
        .cmd()
        .args(["cache", "insert"])
        .arg(&wheel)
        .assert()
        .success();

    sandbox
        .cmd()
        .args(["cache", "list", "--format", "plain"])
        .assert()
        .success()
        .stdout(predicate::str::contains(digest.as_str()));

    sandbox
        .cmd()
        .args(["cache", "purge", &digest.as_str()[..10]])
        .assert()
        .success();

    sandbox
        .cmd()
        .args(["cache", "list", "--format", "plain"])
        .assert()
        .success()
        .stdout(predicate::str::contains(digest.as_str()).not());
}

#[test]
fn cache_insert_rejects_non_wheel() {
    let sandbox = Sandbox::new();
    let bogus = sandbox.path().join("demo-1.0-py3-none-any.whl");
    std::fs::write(&bogus, b"not a zip").unwrap();

    sandbox
        .cmd()
        .args(["cache", "insert"])
        .arg(&bogus)
        .assert()
        .failure();
}

#[test]
fn cache_clear_without_yes_keeps_entries() {
    let sandbox = Sandbox::new();
    let wheel = sandbox.write_wheel("v = 1");
    let digest = Digest::of_file(&wheel).unwrap();
    sandbox.cmd().args(["cache", "insert"]).arg(&wheel).assert().success();

    sandbox.cmd().args(["cache", "clear"]).assert().success();
    sandbox
        .cmd()
        .args(["cache", "list", "--format", "plain"])
        .assert()
        .success()
        .stdout(predicate::str::contains(digest.as_str()));

    sandbox.cmd().args(["cache", "clear", "--yes"]).assert().success();
    sandbox
        .cmd()
        .args(["cache", "list", "--format", "plain"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn registry_requires_endpoint() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["registry", "pull", "demo==1.0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("registry"));
}

#[cfg(unix)]
#[test]
fn build_then_reuse_from_cache() {
    let work = TempDir::new().unwrap();
    let project = write_project(work.path(), "demo", "1.0");
    let prebuilt = work.path().join(wheel_file_name("demo", "1.0"));
    std::fs::write(&prebuilt, sample_wheel("demo", "1.0", "v = 1")).unwrap();

    let build_section = format!(
        "\n[build]\ncommand = [\"sh\", \"-c\", \"cp {} \\\"$0\\\"\", \"{{out_dir}}\"]\n",
        prebuilt.display()
    );
    let sandbox = Sandbox::with_config(&build_section);

    sandbox
        .cmd()
        .args(["build", "--format", "json"])
        .arg(&project)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"origin\": \"built\""));
    assert!(project.join("dist").join(wheel_file_name("demo", "1.0")).is_file());

    std::fs::remove_file(&prebuilt).unwrap();
    sandbox
        .cmd()
        .args(["build", "--format", "json", "--clean"])
        .arg(&project)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"origin\": \"local_cache\""));
    assert!(project.join("dist").join(wheel_file_name("demo", "1.0")).is_file());
}

#[cfg(unix)]
#[test]
fn failing_backend_reports_error() {
    let work = TempDir::new().unwrap();
    let project = write_project(work.path(), "demo", "1.0");
    let sandbox = Sandbox::with_config("\n[build]\ncommand = [\"sh\", \"-c\", \"exit 3\"]\n");

    sandbox
        .cmd()
        .args(["build", "--format", "json"])
        .arg(&project)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}
