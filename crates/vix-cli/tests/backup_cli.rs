//! Integration tests for `vix backup`, `vix restore` and `vix backups`.

mod common;

use std::fs;
use std::path::PathBuf;

use common::Sandbox;
use predicates::prelude::*;

/// Run `vix backup --json` and return the written file.
fn backup(sandbox: &Sandbox, profile: &str, collection: &str) -> PathBuf {
    let output = sandbox
        .cmd()
        .args(["backup", profile, collection, "--json", "-o"])
        .arg(sandbox.path().join("backups"))
        .output()
        .expect("run vix");
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    PathBuf::from(report["path"].as_str().expect("path"))
}

#[test]
fn backup_then_restore_into_another_store() {
    let sandbox = Sandbox::new();
    sandbox.seed_collection("src", "docs", 40, 4);
    sandbox.add_local_profile("from", "src");
    sandbox.add_local_profile("to", "dst");

    let file = backup(&sandbox, "from", "docs");
    assert!(file.starts_with(sandbox.path().join("backups")));
    let text = fs::read_to_string(&file).expect("read backup");
    assert_eq!(text.lines().count(), 41);

    sandbox
        .cmd()
        .args(["restore", "to"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("Restored docs"))
        .stdout(predicate::str::contains("Restored: 40"));

    assert_eq!(sandbox.record_count("dst", "docs"), 40);
}

#[test]
fn restore_refuses_existing_collection_without_overwrite() {
    let sandbox = Sandbox::new();
    sandbox.seed_collection("store", "docs", 10, 4);
    sandbox.add_local_profile("dev", "store");
    let file = backup(&sandbox, "dev", "docs");

    sandbox
        .cmd()
        .args(["restore", "dev"])
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"))
        .stderr(predicate::str::contains("--overwrite"));

    sandbox
        .cmd()
        .args(["restore", "dev", "--overwrite"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("Replaced docs"));
    assert_eq!(sandbox.record_count("store", "docs"), 10);

    sandbox
        .cmd()
        .args(["restore", "dev", "--collection", "docs_copy"])
        .arg(&file)
        .assert()
        .success();
    assert_eq!(sandbox.record_count("store", "docs_copy"), 10);
}

#[test]
fn backups_lists_written_files() {
    let sandbox = Sandbox::new();
    sandbox.seed_collection("store", "docs", 5, 2);
    sandbox.add_local_profile("dev", "store");
    let file = backup(&sandbox, "dev", "docs");
    let name = file.file_name().and_then(|n| n.to_str()).expect("name").to_string();

    sandbox
        .cmd()
        .arg("backups")
        .arg(sandbox.path().join("backups"))
        .assert()
        .success()
        .stdout(predicate::str::contains(name))
        .stdout(predicate::str::contains("local"));

    sandbox
        .cmd()
        .arg("backups")
        .arg(sandbox.path().join("nowhere"))
        .assert()
        .success()
        .stdout(predicate::str::contains("No backups"));
}

#[test]
fn restore_of_a_foreign_file_fails() {
    let sandbox = Sandbox::new();
    sandbox.add_local_profile("dev", "store");
    let file = sandbox.path().join("notes_backup_1.jsonl");
    fs::write(&file, "hello\n").expect("write file");

    sandbox
        .cmd()
        .args(["restore", "dev"])
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid backup"))
        .stderr(predicate::str::contains("vix backup"));
}
