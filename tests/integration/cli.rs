use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn svman() -> Command {
    Command::cargo_bin("svman").expect("binary should build")
}

#[test]
fn missing_config_file_is_reported() {
    let temp = tempdir().expect("failed to create tempdir");
    svman()
        .arg("--config")
        .arg(temp.path().join("absent.yaml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
fn config_without_run_section_is_rejected() {
    let temp = tempdir().expect("failed to create tempdir");
    let config = temp.path().join("svman.yaml");
    fs::write(&config, "global: {}\n").expect("write config");

    svman()
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "Commands must be passed as a HASH ref",
        ));
}

#[test]
fn config_with_empty_run_section_is_rejected() {
    let temp = tempdir().expect("failed to create tempdir");
    let config = temp.path().join("svman.yaml");
    fs::write(&config, "run: {}\n").expect("write config");

    svman()
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Missing command list"));
}

#[test]
fn service_without_command_is_rejected_by_name() {
    let temp = tempdir().expect("failed to create tempdir");
    let config = temp.path().join("svman.yaml");
    fs::write(&config, "run:\n  web:\n    start_retries: 3\n").expect("write config");

    svman()
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Missing command for 'web'"));
}

#[test]
fn occupied_unix_socket_path_is_fatal_at_startup() {
    let temp = tempdir().expect("failed to create tempdir");
    let socket = temp.path().join("ctl.sock");
    fs::write(&socket, b"stale").expect("write stale socket placeholder");

    let config = temp.path().join("svman.yaml");
    fs::write(
        &config,
        format!(
            "run:\n  a: \"sleep 60\"\nglobal:\n  listen: \"unix/:{}\"\n",
            socket.display()
        ),
    )
    .expect("write config");

    svman()
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}
