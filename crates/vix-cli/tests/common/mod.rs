//! Shared test utilities for vix-cli integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use tempfile::TempDir;

/// Get a Command for the vix binary.
///
/// # Panics
///
/// Panics if the vix binary cannot be found. This should not happen
/// in a properly configured test environment.
#[allow(deprecated)]
pub fn vix_cmd() -> Command {
    Command::cargo_bin("vix").expect("vix binary should exist")
}

/// An isolated home for one test: profile store, config and local stores.
pub struct Sandbox {
    pub dir: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn profiles_path(&self) -> PathBuf {
        self.path().join("profiles.json")
    }

    /// A vix command with memory secrets, a private profile store and an
    /// empty config file.
    pub fn cmd(&self) -> Command {
        let config = self.path().join("config.yaml");
        if !config.exists() {
            fs::write(&config, "{}\n").expect("write config");
        }
        let mut cmd = vix_cmd();
        cmd.env_remove("VIX_VERBOSE")
            .env("NO_COLOR", "1")
            .arg("--color")
            .arg("never")
            .arg("--vault")
            .arg("memory")
            .arg("--config")
            .arg(config)
            .arg("--profiles")
            .arg(self.profiles_path());
        cmd
    }

    /// Directory of a local store inside the sandbox.
    pub fn store(&self, name: &str) -> PathBuf {
        self.path().join(name)
    }

    /// Save a local-provider profile pointing at `store`.
    pub fn add_local_profile(&self, name: &str, store: &str) {
        self.cmd()
            .args(["profile", "add", name, "--provider", "local", "-e"])
            .arg(format!("path={}", self.store(store).display()))
            .assert()
            .success();
    }

    /// Write a collection in the local store format with `count` items.
    pub fn seed_collection(&self, store: &str, collection: &str, count: usize, dimension: usize) {
        let dir = self.store(store).join(collection);
        fs::create_dir_all(&dir).expect("create collection dir");

        let now = "2026-01-01T00:00:00Z";
        let meta = serde_json::json!({
            "name": collection,
            "dimension": dimension,
            "metric": "cosine",
            "count": count,
            "schemaVersion": 1,
            "createdAt": now,
            "updatedAt": now,
        });
        fs::write(
            dir.join("collection.meta.json"),
            serde_json::to_string_pretty(&meta).expect("meta json"),
        )
        .expect("write meta");

        let mut lines = String::new();
        for i in 0..count {
            let record = serde_json::json!({
                "id": format!("item-{i:04}"),
                "vector": vec![i as f32 / 10.0; dimension],
                "document": format!("document {i}"),
                "metadata": { "n": i },
            });
            lines.push_str(&record.to_string());
            lines.push('\n');
        }
        fs::write(dir.join("records.jsonl"), lines).expect("write records");
    }

    /// Number of items stored in a local collection.
    pub fn record_count(&self, store: &str, collection: &str) -> usize {
        let path = self.store(store).join(collection).join("records.jsonl");
        fs::read_to_string(path)
            .map(|s| s.lines().filter(|l| !l.trim().is_empty()).count())
            .unwrap_or(0)
    }
}
