//! Command-line behaviour of the `latchkey` binary.

use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const POLICIES: &str = r#"[
    {
        "id": "P1",
        "name": "guards unlock",
        "effect": "Allow",
        "priority": 100,
        "creator": "facilities",
        "created_at": "2025-01-01T00:00:00Z",
        "allowed_actions": ["unlock"],
        "subject_conditions": [
            { "attribute_name": "role", "operator": "Equal", "expected_value": "guard" }
        ]
    },
    {
        "id": "P2",
        "name": "no reboots",
        "effect": "Deny",
        "priority": 200,
        "creator": "facilities",
        "created_at": "2025-01-01T00:00:00Z",
        "allowed_actions": ["reboot"]
    }
]"#;

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn latchkey(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("latchkey").unwrap();
    cmd.current_dir(dir.path()).env("HOME", dir.path());
    cmd
}

#[test]
fn validate_accepts_a_good_file() {
    let dir = TempDir::new().unwrap();
    let policies = write(&dir, "policies.json", POLICIES);

    latchkey(&dir)
        .arg("validate")
        .arg(&policies)
        .assert()
        .success()
        .stdout(predicate::str::contains("2 policies valid"));
}

#[test]
fn validate_reports_invalid_policies() {
    let dir = TempDir::new().unwrap();
    let bad = POLICIES.replace("\"priority\": 200", "\"priority\": 5000");
    let policies = write(&dir, "policies.json", &bad);

    latchkey(&dir)
        .arg("validate")
        .arg(&policies)
        .assert()
        .failure()
        .stdout(predicate::str::contains("invalid P2"));
}

#[test]
fn check_grants_owner_with_matching_fact() {
    let dir = TempDir::new().unwrap();
    let policies = write(&dir, "policies.json", POLICIES);

    latchkey(&dir)
        .args(["check"])
        .arg(&policies)
        .args(["--subject", "alice", "--device", "door-1", "--resource", "lockset"])
        .args(["--action", "unlock", "--fact", "role=guard", "--owner"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"Granted\""));
}

#[test]
fn check_denies_without_ownership() {
    let dir = TempDir::new().unwrap();
    let policies = write(&dir, "policies.json", POLICIES);

    latchkey(&dir)
        .args(["check"])
        .arg(&policies)
        .args(["--subject", "alice", "--device", "door-1", "--resource", "lockset"])
        .args(["--action", "unlock", "--fact", "role=guard"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"Denied\""));
}

#[test]
fn config_prints_project_overrides() {
    let dir = TempDir::new().unwrap();
    write(&dir, "latchkey.toml", "[audit]\nqueue_capacity = 64\n");

    latchkey(&dir)
        .arg("config")
        .arg("--dir")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("queue_capacity = 64"));
}
