// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Resumable apply, end to end
//!
//! This test walks through an interrupted release:
//! 1. Write a plan whose second action cannot succeed
//! 2. Apply it: the first action is recorded, the run stops at the second
//! 3. Check the status file
//! 4. Fix the cause of the failure
//! 5. Apply again: only the failed and later actions run

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn soma_forge(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("soma-forge").unwrap();
    cmd.env("SOMA_FORGE_CONFIG", config).env("NO_COLOR", "1");
    cmd
}

fn status_json(config: &Path, tree: &Path) -> serde_json::Value {
    let output = soma_forge(config)
        .arg("--json")
        .arg("status")
        .arg(tree)
        .output()
        .unwrap();
    assert!(output.status.success());
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_interrupted_apply_resumes() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.toml");
    fs::write(&config, "").unwrap();
    let tree = dir.path().join("tree");
    fs::create_dir_all(tree.join("plan")).unwrap();

    // `blocker` is a file, so nothing can be written below it
    let first = tree.join("first.txt");
    let blocker = tree.join("blocker");
    fs::write(&blocker, "").unwrap();
    let second = blocker.join("second.txt");

    fs::write(
        tree.join("plan/actions.yaml"),
        format!(
            "- action: modify_file\n  file: {}\n  contents: one\n\
             - action: modify_file\n  file: {}\n  contents: two\n\
             - action: record_build\n  package: soma\n  version: 6.0.4\n  build_string: py311_7\n  changesets:\n    soma-base: 0123abcd\n",
            first.display(),
            second.display()
        ),
    )
    .unwrap();

    // Step 2: the run stops at the second action
    soma_forge(&config)
        .arg("apply")
        .arg(&tree)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Action 2/3 failed"));
    assert_eq!(fs::read_to_string(&first).unwrap(), "one");
    assert!(!tree.join("plan/history.json").exists());

    // Step 3: the status file records what happened
    let actions = status_json(&config, &tree);
    assert_eq!(actions[0]["status"], "success");
    assert!(actions[0]["applied_at"].is_string());
    assert_eq!(actions[1]["status"], "failed");
    assert!(actions[1]["error"].is_string());
    assert!(actions[2].get("status").is_none());

    soma_forge(&config)
        .arg("apply")
        .arg(&tree)
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(predicate::str::contains("1. Modify"))
        .stdout(predicate::str::contains("2. Record build soma 6.0.4 py311_7"))
        .stdout(predicate::str::contains("1 action(s) already done"));

    // Step 4: remove the cause of the failure; touch the first file to see
    // that it is not written again
    fs::remove_file(&blocker).unwrap();
    fs::write(&first, "edited").unwrap();

    // Step 5: resume
    soma_forge(&config)
        .arg("apply")
        .arg(&tree)
        .assert()
        .success()
        .stdout(predicate::str::contains("2 action(s) executed, 1 already done"));

    assert_eq!(fs::read_to_string(&first).unwrap(), "edited");
    assert_eq!(fs::read_to_string(&second).unwrap(), "two");

    let history: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(tree.join("plan/history.json")).unwrap()).unwrap();
    assert_eq!(history["soma"]["version"], "6.0.4");
    assert_eq!(history["soma"]["build_string"], "py311_7");
    assert_eq!(history["soma"]["changesets"]["soma-base"], "0123abcd");

    let actions = status_json(&config, &tree);
    for action in actions.as_array().unwrap() {
        assert_eq!(action["status"], "success");
        assert!(action.get("error").is_none());
    }

    // A finished plan is a no-op
    soma_forge(&config)
        .arg("apply")
        .arg(&tree)
        .assert()
        .success()
        .stdout(predicate::str::contains("0 action(s) executed, 3 already done"));
}
