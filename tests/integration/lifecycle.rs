#[path = "common/mod.rs"]
mod common;

use std::io::{BufRead, Write};
use std::time::{Duration, Instant};

use common::{RunningSupervisor, connect, request, wait_for_status};
use tempfile::tempdir;

#[test]
fn control_round_trip_over_unix_socket() {
    let temp = tempdir().expect("failed to create tempdir");
    let running = RunningSupervisor::start(
        temp.path(),
        r#"run:
  a:
    cmd: "sleep 60"
    start_wait: 0.05
  b:
    cmd: "/bin/false"
    start_retries: 0
    start_wait: 0.5
"#,
    );

    wait_for_status(&running.socket, "a", "up");
    wait_for_status(&running.socket, "b", "fatal");

    // `status` reports one line per service, sorted by name.
    let mut reader = connect(&running.socket);
    let lines = request(&mut reader, "status", 2);
    let a_fields: Vec<&str> = lines[0].split(' ').collect();
    assert_eq!(a_fields[0], "a");
    assert_eq!(a_fields[1], "up");
    let pid: u32 = a_fields[2].parse().expect("status carries the pid");
    assert!(pid > 0);
    let uptime: u64 = a_fields[3].parse().expect("status carries the uptime");
    assert!(uptime < 60);
    assert_eq!(lines[1], "b fatal");

    // `down a` delivers TERM and reports the delivery.
    let lines = request(&mut reader, "down a", 1);
    assert_eq!(lines[0], "down a 1");
    wait_for_status(&running.socket, "a", "down");

    // `.` closes the connection.
    reader
        .get_mut()
        .write_all(b".\n")
        .expect("write close request");
    let mut rest = String::new();
    let read = reader.read_line(&mut rest).expect("read after close");
    assert_eq!(read, 0, "connection should be closed after '.'");

    running.stop();
}

#[test]
fn surviving_service_reports_up_with_pid() {
    let temp = tempdir().expect("failed to create tempdir");
    let running = RunningSupervisor::start(
        temp.path(),
        r#"run:
  steady:
    cmd: "sleep 60"
    start_wait: 0.05
"#,
    );

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let mut reader = connect(&running.socket);
        let lines = request(&mut reader, "status steady", 1);
        let fields: Vec<&str> = lines[0].split(' ').collect();
        if fields.get(2) == Some(&"up") {
            assert_eq!(fields.len(), 5, "up status carries pid and uptime");
            assert!(fields[3].parse::<u32>().is_ok());
            assert!(fields[4].parse::<u64>().is_ok());
            break;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for steady to come up; last: '{}'",
            lines[0]
        );
        std::thread::sleep(Duration::from_millis(50));
    }

    running.stop();
}

#[test]
fn flapping_service_lands_fatal_through_the_socket() {
    let temp = tempdir().expect("failed to create tempdir");
    let running = RunningSupervisor::start(
        temp.path(),
        r#"run:
  flapper:
    cmd: "/bin/false"
    start_retries: 3
    restart_delay: 0.01
    start_wait: 0.5
"#,
    );

    wait_for_status(&running.socket, "flapper", "fatal");

    // An operator `up` revives the service with a fresh budget.
    let mut reader = connect(&running.socket);
    let lines = request(&mut reader, "up flapper", 1);
    assert_ne!(
        lines[0], "up flapper fail",
        "operator up should revive a fatal service"
    );

    running.stop();
}

#[test]
fn once_run_service_is_not_restarted() {
    let temp = tempdir().expect("failed to create tempdir");
    let running = RunningSupervisor::start(
        temp.path(),
        r#"run:
  tick:
    cmd: "/bin/false"
    start_retries: 0
    start_wait: 0.5
"#,
    );

    wait_for_status(&running.socket, "tick", "fatal");

    let mut reader = connect(&running.socket);
    let lines = request(&mut reader, "once tick", 1);
    assert_ne!(lines[0], "once tick fail");

    // The one-shot exit parks the service fatal again instead of
    // entering the restart path.
    wait_for_status(&running.socket, "tick", "fatal");

    running.stop();
}

#[test]
fn shutdown_removes_the_socket_file() {
    let temp = tempdir().expect("failed to create tempdir");
    let running = RunningSupervisor::start(temp.path(), "run:\n  a: \"sleep 60\"\n");
    let socket = running.socket.clone();
    assert!(socket.exists());

    running.stop();
    assert!(!socket.exists(), "socket file should be removed on shutdown");
}
