//! CLI tests for the `lp` binary

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Config pointing every file the CLI touches into `dir`
fn write_config(dir: &Path) -> std::path::PathBuf {
    let config = format!(
        "storage:\n  accounts-file: {}\n  identities-file: {}\n  metrics-dir: {}\n",
        dir.join("accounts.json").display(),
        dir.join("identities.json").display(),
        dir.join("metrics").display(),
    );
    let path = dir.join("launchpool.yml");
    fs::write(&path, config).unwrap();
    path
}

fn lp(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("lp").unwrap();
    cmd.env("XDG_DATA_HOME", dir.join("data")).current_dir(dir);
    cmd
}

#[test]
fn test_help_lists_commands() {
    let temp = TempDir::new().unwrap();
    lp(temp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("groups"))
        .stdout(predicate::str::contains("identities"))
        .stdout(predicate::str::contains("metrics"));
}

#[test]
fn test_unknown_mode_rejected() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());
    lp(temp.path())
        .args(["--config", config.to_str().unwrap(), "run", "--mode", "sprint"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown launch mode"));
}

#[test]
fn test_metrics_without_runs() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());
    lp(temp.path())
        .args(["--config", config.to_str().unwrap(), "metrics"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No runs recorded yet."));
}

#[test]
fn test_groups_from_accounts_file() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());
    fs::write(
        temp.path().join("accounts.json"),
        r#"[
            {"name": "alice", "identities": ["vpn-de"]},
            {"name": "bob", "identities": ["vpn-de", "vpn-nl"]},
            {"name": "carol"}
        ]"#,
    )
    .unwrap();

    lp(temp.path())
        .args(["--config", config.to_str().unwrap(), "groups"])
        .assert()
        .success()
        .stdout(predicate::str::contains("vpn-de"))
        .stdout(predicate::str::contains("vpn-nl"))
        .stdout(predicate::str::contains("carol"));
}

#[test]
fn test_identities_import_phonebook() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());
    let phonebook = temp.path().join("rasphone.pbk");
    fs::write(
        &phonebook,
        "[Frankfurt]\nPhoneNumber=de.example.net\n\n[Broken]\nDevice=none\n\n[Oslo]\nPhoneNumber=no.example.net\n",
    )
    .unwrap();

    lp(temp.path())
        .args([
            "--config",
            config.to_str().unwrap(),
            "identities",
            "--import",
            phonebook.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Frankfurt"))
        .stdout(predicate::str::contains("Oslo"))
        .stdout(predicate::str::contains("Broken").not());

    let saved = fs::read_to_string(temp.path().join("identities.json")).unwrap();
    assert!(saved.contains("Frankfurt"));
    assert!(!saved.contains("Broken"));
}

#[test]
fn test_run_with_no_accounts() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());
    lp(temp.path())
        .args(["--config", config.to_str().unwrap(), "run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No accounts to launch."));
}
