//! Control endpoint: listener, per-connection line sessions, and the
//! protocol verb set.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::mpsc;
use std::thread;

use nix::sys::signal::Signal;
use thiserror::Error;
use tracing::debug;

use crate::constants::{MAX_LINE_BYTES, SESSION_IDLE_TIMEOUT};
use crate::supervisor::Event;

/// Errors raised while standing up the control endpoint.
#[derive(Debug, Error)]
pub enum ControlError {
    /// A Unix socket path is already occupied; refusing to clobber it.
    #[error("control socket path '{0}' already exists")]
    SocketExists(PathBuf),

    /// The endpoint could not be bound.
    #[error("failed to bind control socket '{addr}': {source}")]
    Bind {
        /// The endpoint that failed to bind.
        addr: String,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },
}

/// Parsed control endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    /// Unix domain stream socket at the given path.
    Unix(PathBuf),
    /// TCP endpoint in `ip:port` form.
    Tcp(String),
}

impl ListenAddr {
    /// `unix/:<path>` selects a Unix socket; anything else is a TCP
    /// `ip:port` endpoint (validated at bind time).
    pub fn parse(spec: &str) -> Self {
        match spec.strip_prefix("unix/:") {
            Some(path) => ListenAddr::Unix(PathBuf::from(path)),
            None => ListenAddr::Tcp(spec.to_string()),
        }
    }
}

impl FromStr for ListenAddr {
    type Err = std::convert::Infallible;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(spec))
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenAddr::Unix(path) => write!(f, "unix/:{}", path.display()),
            ListenAddr::Tcp(addr) => write!(f, "{addr}"),
        }
    }
}

/// Protocol verbs accepted on a control session, in their wire
/// spelling. Case-sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Verb {
    Up,
    Once,
    Down,
    Pause,
    Cont,
    Hup,
    Alarm,
    Int,
    Quit,
    Usr1,
    Usr2,
    Term,
    Kill,
    Status,
}

impl Verb {
    /// The signal a pure signal verb delivers to the child, if any.
    pub(crate) fn signal(self) -> Option<Signal> {
        match self {
            Verb::Pause => Some(Signal::SIGSTOP),
            Verb::Cont => Some(Signal::SIGCONT),
            Verb::Hup => Some(Signal::SIGHUP),
            Verb::Alarm => Some(Signal::SIGALRM),
            Verb::Int => Some(Signal::SIGINT),
            Verb::Quit => Some(Signal::SIGQUIT),
            Verb::Usr1 => Some(Signal::SIGUSR1),
            Verb::Usr2 => Some(Signal::SIGUSR2),
            Verb::Term => Some(Signal::SIGTERM),
            Verb::Kill => Some(Signal::SIGKILL),
            Verb::Up | Verb::Once | Verb::Down | Verb::Status => None,
        }
    }
}

/// Bound control listener, Unix or TCP.
#[derive(Debug)]
pub(crate) enum ControlListener {
    Unix(UnixListener),
    Tcp(TcpListener),
}

impl ControlListener {
    pub(crate) fn bind(addr: &ListenAddr) -> Result<Self, ControlError> {
        match addr {
            ListenAddr::Unix(path) => {
                if path.exists() {
                    return Err(ControlError::SocketExists(path.clone()));
                }
                UnixListener::bind(path)
                    .map(ControlListener::Unix)
                    .map_err(|source| ControlError::Bind {
                        addr: addr.to_string(),
                        source,
                    })
            }
            ListenAddr::Tcp(spec) => TcpListener::bind(spec)
                .map(ControlListener::Tcp)
                .map_err(|source| ControlError::Bind {
                    addr: addr.to_string(),
                    source,
                }),
        }
    }

    fn accept(&self) -> io::Result<(ControlStream, String)> {
        match self {
            ControlListener::Unix(listener) => {
                let (stream, _) = listener.accept()?;
                Ok((ControlStream::Unix(stream), "unix".to_string()))
            }
            ControlListener::Tcp(listener) => {
                let (stream, peer) = listener.accept()?;
                Ok((ControlStream::Tcp(stream), peer.to_string()))
            }
        }
    }
}

enum ControlStream {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl ControlStream {
    fn set_read_timeout(&self, timeout: std::time::Duration) -> io::Result<()> {
        match self {
            ControlStream::Unix(s) => s.set_read_timeout(Some(timeout)),
            ControlStream::Tcp(s) => s.set_read_timeout(Some(timeout)),
        }
    }
}

impl Read for ControlStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ControlStream::Unix(s) => s.read(buf),
            ControlStream::Tcp(s) => s.read(buf),
        }
    }
}

impl Write for ControlStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ControlStream::Unix(s) => s.write(buf),
            ControlStream::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ControlStream::Unix(s) => s.flush(),
            ControlStream::Tcp(s) => s.flush(),
        }
    }
}

/// Accepts connections on a dedicated thread and hands each one to a
/// session thread. Sessions never touch supervisor state; they round
/// every request through the event channel.
pub(crate) fn serve(listener: ControlListener, events: mpsc::Sender<Event>) {
    thread::spawn(move || {
        let mut next_id: u64 = 0;
        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    next_id += 1;
                    let conn = next_id;
                    let events = events.clone();
                    thread::spawn(move || run_session(conn, peer, stream, events));
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!(%err, "control listener stopped accepting");
                    break;
                }
            }
        }
    });
}

fn run_session(
    conn: u64,
    peer: String,
    mut stream: ControlStream,
    events: mpsc::Sender<Event>,
) {
    if events
        .send(Event::Connected {
            conn,
            peer: peer.clone(),
        })
        .is_err()
    {
        return;
    }

    if let Err(err) = session_loop(conn, &mut stream, &events) {
        debug!(conn, peer = %peer, %err, "control session closed with error");
    }

    let _ = events.send(Event::Disconnected { conn });
}

fn session_loop(
    conn: u64,
    stream: &mut ControlStream,
    events: &mpsc::Sender<Event>,
) -> io::Result<()> {
    stream.set_read_timeout(SESSION_IDLE_TIMEOUT)?;

    loop {
        let Some(line) = read_request(stream)? else {
            return Ok(());
        };

        if line == "quit" || line == "." {
            return Ok(());
        }

        let (reply_tx, reply_rx) = mpsc::channel();
        if events
            .send(Event::Request {
                conn,
                line,
                reply: reply_tx,
            })
            .is_err()
        {
            // Supervisor loop is gone; nothing left to serve.
            return Ok(());
        }
        let Ok(response) = reply_rx.recv() else {
            return Ok(());
        };

        // A blank line acknowledges the request before the response.
        stream.write_all(b"\n")?;
        for line in &response {
            if line.len() >= MAX_LINE_BYTES {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "response line exceeds buffer cap",
                ));
            }
            stream.write_all(line.as_bytes())?;
            stream.write_all(b"\n")?;
        }
        stream.flush()?;
    }
}

/// Reads one newline-terminated request. Returns `None` on a clean
/// disconnect. A line longer than the buffer cap or non-ASCII input is
/// an error and drops the connection.
fn read_request(stream: &mut ControlStream) -> io::Result<Option<String>> {
    let mut buf = Vec::with_capacity(MAX_LINE_BYTES);
    let mut byte = [0u8; 1];

    loop {
        let n = stream.read(&mut byte)?;
        if n == 0 {
            return Ok(None);
        }
        if byte[0] == b'\n' {
            break;
        }
        if buf.len() >= MAX_LINE_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "request line exceeds buffer cap",
            ));
        }
        buf.push(byte[0]);
    }

    if !buf.is_ascii() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "request is not ASCII",
        ));
    }

    let mut line = String::from_utf8(buf)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "request is not ASCII"))?;
    if line.ends_with('\r') {
        line.pop();
    }
    Ok(Some(line))
}
