//! Integration tests for `vix profile` and `vix vault`.

mod common;

use common::Sandbox;
use predicates::prelude::*;

fn profile_names(sandbox: &Sandbox) -> Vec<String> {
    let output = sandbox
        .cmd()
        .args(["profile", "list", "--json"])
        .output()
        .expect("run vix");
    assert!(output.status.success());
    let list: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json list");
    let mut names: Vec<String> = list
        .as_array()
        .expect("array")
        .iter()
        .map(|p| p["name"].as_str().unwrap_or_default().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn empty_store_lists_nothing() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["profile", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No profiles saved"));
}

#[test]
fn add_then_list_shows_profile() {
    let sandbox = Sandbox::new();
    sandbox.add_local_profile("Local dev", "store");

    sandbox
        .cmd()
        .args(["profile", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Local dev"))
        .stdout(predicate::str::contains("local"));
    assert!(sandbox.profiles_path().exists());
}

#[test]
fn duplicate_names_are_rejected() {
    let sandbox = Sandbox::new();
    sandbox.add_local_profile("dev", "a");

    sandbox
        .cmd()
        .args(["profile", "add", "dev", "--provider", "memory"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("[err]"));
    assert_eq!(profile_names(&sandbox), vec!["dev"]);
}

#[test]
fn missing_endpoint_field_is_rejected() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["profile", "add", "broken", "--provider", "local"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("path"));
    assert!(profile_names(&sandbox).is_empty());
}

#[test]
fn rename_duplicate_and_remove() {
    let sandbox = Sandbox::new();
    sandbox.add_local_profile("dev", "a");

    sandbox
        .cmd()
        .args(["profile", "rename", "dev", "staging"])
        .assert()
        .success();
    sandbox
        .cmd()
        .args(["profile", "duplicate", "staging", "--name", "staging-2"])
        .assert()
        .success();
    assert_eq!(profile_names(&sandbox), vec!["staging", "staging-2"]);

    sandbox
        .cmd()
        .args(["profile", "rm", "staging"])
        .assert()
        .success();
    assert_eq!(profile_names(&sandbox), vec!["staging-2"]);
}

#[test]
fn unknown_profile_fails_with_hint() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["profile", "rm", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("[err]"))
        .stderr(predicate::str::contains("vix profile list"));
}

#[test]
fn export_import_into_another_store() {
    let first = Sandbox::new();
    first.add_local_profile("dev", "a");
    first.add_local_profile("prod", "b");
    let export = first.path().join("export.json");

    first
        .cmd()
        .args(["profile", "export", "-o"])
        .arg(&export)
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported 2 profiles"));

    let second = Sandbox::new();
    second.add_local_profile("dev", "c");
    second
        .cmd()
        .args(["profile", "import"])
        .arg(&export)
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 2 profiles"));

    let names = profile_names(&second);
    assert_eq!(names.len(), 3);
    assert!(names.contains(&"prod".to_string()));
    assert_eq!(names.iter().filter(|n| n.starts_with("dev")).count(), 2);
}

#[test]
fn export_never_contains_secrets() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .env("VIX_TEST_KEY", "sk-very-secret")
        .args(["profile", "add", "cloud", "--provider", "memory", "--api-key-env", "VIX_TEST_KEY"])
        .assert()
        .success();

    sandbox
        .cmd()
        .args(["profile", "export"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cloud"))
        .stdout(predicate::str::contains("sk-very-secret").not());
}

#[test]
fn missing_api_key_variable_fails() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .env_remove("VIX_UNSET_KEY")
        .args(["profile", "add", "cloud", "--provider", "memory", "--api-key-env", "VIX_UNSET_KEY"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("VIX_UNSET_KEY"));
}

#[test]
fn vault_status_reports_memory_backend() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["profile", "add", "cloud", "--provider", "memory", "--api-key", "k"])
        .assert()
        .success()
        .stdout(predicate::str::contains("in memory only"));

    let output = sandbox
        .cmd()
        .args(["vault", "status", "--json"])
        .output()
        .expect("run vix");
    assert!(output.status.success());
    let status: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(status["persistent"], false);
    // Each invocation starts with an empty memory vault.
    assert_eq!(status["secrets"][0]["profile"], "cloud");
    assert_eq!(status["secrets"][0]["present"], false);
}
