#![allow(dead_code)]

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use svman::config::Settings;
use svman::supervisor::{Supervisor, SupervisorHandle};

pub struct RunningSupervisor {
    pub handle: SupervisorHandle,
    pub thread: JoinHandle<()>,
    pub socket: PathBuf,
}

impl RunningSupervisor {
    /// Starts a supervisor with the given `run:` section and a Unix
    /// control socket inside `dir`.
    pub fn start(dir: &Path, services_yaml: &str) -> Self {
        let socket = dir.join("ctl.sock");
        let yaml = format!(
            "{services_yaml}global:\n  listen: \"unix/:{}\"\n",
            socket.display()
        );
        let settings = Settings::from_yaml(&yaml).expect("test config should validate");
        let mut supervisor = Supervisor::new(settings);
        let handle = supervisor.handle();
        let thread = thread::spawn(move || {
            supervisor.run().expect("supervisor run should succeed");
        });

        wait_for_path(&socket);
        Self {
            handle,
            thread,
            socket,
        }
    }

    pub fn stop(self) {
        self.handle.shutdown();
        self.thread.join().expect("supervisor thread should join");
    }
}

pub fn wait_for_path(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!("Timed out waiting for {:?} to exist", path);
}

pub fn connect(socket: &Path) -> BufReader<UnixStream> {
    let stream = UnixStream::connect(socket).expect("connect to control socket");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("set read timeout");
    BufReader::new(stream)
}

pub fn connect_tcp(addr: &str) -> BufReader<TcpStream> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match TcpStream::connect(addr) {
            Ok(stream) => {
                stream
                    .set_read_timeout(Some(Duration::from_secs(5)))
                    .expect("set read timeout");
                return BufReader::new(stream);
            }
            Err(err) => {
                if Instant::now() >= deadline {
                    panic!("Timed out connecting to {addr}: {err}");
                }
                thread::sleep(Duration::from_millis(20));
            }
        }
    }
}

/// Sends one request and reads back the blank acknowledgement line plus
/// `expected` response lines.
pub fn request<S: std::io::Read + Write>(
    reader: &mut BufReader<S>,
    line: &str,
    expected: usize,
) -> Vec<String> {
    reader
        .get_mut()
        .write_all(format!("{line}\n").as_bytes())
        .expect("write request");

    let mut ack = String::new();
    reader.read_line(&mut ack).expect("read acknowledgement");
    assert_eq!(ack, "\n", "request should be acknowledged with a blank line");

    let mut lines = Vec::with_capacity(expected);
    for _ in 0..expected {
        let mut response = String::new();
        reader.read_line(&mut response).expect("read response line");
        lines.push(response.trim_end_matches('\n').to_string());
    }
    lines
}

/// Polls `status <service>` until the response starts with the expected
/// token.
pub fn wait_for_status(socket: &Path, service: &str, expected: &str) {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut last = String::new();
    while Instant::now() < deadline {
        let mut reader = connect(socket);
        let line = format!("status {service}");
        let response = request(&mut reader, &line, 1);
        last = response[0].clone();
        if last.starts_with(&format!("{line} {expected}")) {
            return;
        }
        thread::sleep(Duration::from_millis(50));
    }
    panic!("Timed out waiting for '{service}' to report '{expected}'; last: '{last}'");
}
