#[path = "common/mod.rs"]
mod common;

use std::io::{BufRead, Read, Write};
use std::net::TcpListener;

use common::{RunningSupervisor, connect, connect_tcp, request};
use svman::config::Settings;
use svman::supervisor::Supervisor;
use tempfile::tempdir;

#[test]
fn unknown_verbs_and_services_keep_the_connection() {
    let temp = tempdir().expect("failed to create tempdir");
    let running = RunningSupervisor::start(temp.path(), "run:\n  a: \"sleep 60\"\n");

    let mut reader = connect(&running.socket);
    assert_eq!(request(&mut reader, "reload a", 1), vec!["reload a unknown"]);
    assert_eq!(request(&mut reader, "up ghost", 1), vec!["up ghost unknown"]);
    assert_eq!(request(&mut reader, "gibberish", 1), vec!["gibberish unknown"]);

    // The connection survives bad input; a valid request still works.
    let lines = request(&mut reader, "status a", 1);
    assert!(lines[0].starts_with("status a "));

    running.stop();
}

#[test]
fn quit_closes_the_connection() {
    let temp = tempdir().expect("failed to create tempdir");
    let running = RunningSupervisor::start(temp.path(), "run:\n  a: \"sleep 60\"\n");

    let mut reader = connect(&running.socket);
    reader
        .get_mut()
        .write_all(b"quit\n")
        .expect("write quit request");
    let mut rest = String::new();
    let read = reader.read_line(&mut rest).expect("read after quit");
    assert_eq!(read, 0, "connection should be closed after 'quit'");

    running.stop();
}

#[test]
fn oversize_request_line_drops_the_connection() {
    let temp = tempdir().expect("failed to create tempdir");
    let running = RunningSupervisor::start(temp.path(), "run:\n  a: \"sleep 60\"\n");

    let mut reader = connect(&running.socket);
    let oversize = "x".repeat(100);
    reader
        .get_mut()
        .write_all(format!("{oversize}\n").as_bytes())
        .expect("write oversize request");

    let mut buf = Vec::new();
    let read = reader
        .get_mut()
        .read_to_end(&mut buf)
        .expect("read after oversize request");
    assert_eq!(read, 0, "oversize input should close the connection");

    running.stop();
}

#[test]
fn concurrent_sessions_are_served() {
    let temp = tempdir().expect("failed to create tempdir");
    let running = RunningSupervisor::start(temp.path(), "run:\n  a: \"sleep 60\"\n");

    let mut first = connect(&running.socket);
    let mut second = connect(&running.socket);

    let from_first = request(&mut first, "status a", 1);
    let from_second = request(&mut second, "status a", 1);
    assert_eq!(from_first, from_second);

    running.stop();
}

#[test]
fn tcp_endpoint_serves_the_same_protocol() {
    // Grab a free port, release it, and hand it to the supervisor.
    let port = {
        let probe = TcpListener::bind("127.0.0.1:0").expect("probe for a free port");
        probe.local_addr().expect("probe addr").port()
    };
    let addr = format!("127.0.0.1:{port}");

    let yaml = format!("run:\n  a: \"sleep 60\"\nglobal:\n  listen: \"{addr}\"\n");
    let settings = Settings::from_yaml(&yaml).expect("test config should validate");
    let mut supervisor = Supervisor::new(settings);
    let handle = supervisor.handle();
    let thread = std::thread::spawn(move || {
        supervisor.run().expect("supervisor run should succeed");
    });

    let mut reader = connect_tcp(&addr);
    let lines = request(&mut reader, "status a", 1);
    assert!(lines[0].starts_with("status a "));

    handle.shutdown();
    thread.join().expect("supervisor thread should join");
}
