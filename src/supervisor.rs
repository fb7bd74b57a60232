//! The supervision engine: service table, event loop, restart policy,
//! signal fan-out, and control dispatch.
//!
//! Every mutation of service and connection state happens on the one
//! thread that runs [`Supervisor::run`]. Child watchers, the signal
//! watcher, and control sessions all funnel into the loop through an
//! event channel, so callbacks execute atomically with respect to each
//! other and no locks guard the service table.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::constants::IDLE_WAIT;
use crate::control::{self, ControlError, ControlListener, ListenAddr, Verb};
use crate::error::ConfigError;
use crate::privilege::ChildCredentials;
use crate::service::{Service, ServiceState};
use crate::spawn;

/// Errors emitted by the supervisor runtime.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One input to the event loop. Everything the supervisor reacts to
/// arrives as one of these.
pub(crate) enum Event {
    /// A watched child exited; `code` is the exit-code byte.
    ChildExit {
        service: String,
        pid: u32,
        code: i32,
    },
    /// An OS signal was delivered to the supervisor process.
    Signal(i32),
    /// A control session wants a request dispatched.
    Request {
        conn: u64,
        line: String,
        reply: mpsc::Sender<Vec<String>>,
    },
    /// A control session opened.
    Connected { conn: u64, peer: String },
    /// A control session went away.
    Disconnected { conn: u64 },
    /// Programmatic shutdown, equivalent to the TERM path.
    Shutdown,
}

#[derive(Debug)]
enum TimerAction {
    /// Grace check after a spawn: the child is `up` if still alive.
    StartWait { service: String, generation: u64 },
    /// Grace expired after TERM: escalate to KILL.
    StopWait { service: String, generation: u64 },
    /// Restart delay elapsed: attempt the next start.
    Restart { service: String, generation: u64 },
}

#[derive(Debug)]
struct Timer {
    due: Instant,
    seq: u64,
    action: TimerAction,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

/// Cloneable handle for requesting a graceful shutdown from outside the
/// loop, e.g. from an embedding application.
#[derive(Clone)]
pub struct SupervisorHandle {
    events: mpsc::Sender<Event>,
}

impl SupervisorHandle {
    /// Asks the supervisor to TERM its children and leave the loop.
    pub fn shutdown(&self) {
        let _ = self.events.send(Event::Shutdown);
    }
}

/// Owns the service table and drives every lifecycle transition.
pub struct Supervisor {
    services: HashMap<String, Service>,
    listen: Option<ListenAddr>,
    umask: Option<u32>,
    events: mpsc::Sender<Event>,
    inbox: mpsc::Receiver<Event>,
    timers: BinaryHeap<Reverse<Timer>>,
    timer_seq: u64,
    sessions: HashMap<u64, String>,
    shutdown: bool,
}

impl Supervisor {
    /// Builds a supervisor from validated settings. Nothing is spawned
    /// until [`run`](Self::run).
    pub fn new(settings: Settings) -> Self {
        let (events, inbox) = mpsc::channel();
        let services = settings
            .services
            .into_iter()
            .map(|(name, config)| (name, Service::new(config)))
            .collect();

        Self {
            services,
            listen: settings.listen,
            umask: settings.umask,
            events,
            inbox,
            timers: BinaryHeap::new(),
            timer_seq: 0,
            sessions: HashMap::new(),
            shutdown: false,
        }
    }

    /// A handle for requesting shutdown from another thread.
    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            events: self.events.clone(),
        }
    }

    /// Binds the control endpoint, installs signal handlers, starts
    /// every declared service, and runs the event loop. Returns once a
    /// TERM arrives, an INT arrives with no live children, or a
    /// [`SupervisorHandle::shutdown`] is requested.
    pub fn run(&mut self) -> Result<(), SupervisorError> {
        if let Some(addr) = self.listen.clone() {
            let listener = ControlListener::bind(&addr)?;
            info!(%addr, "control socket bound");
            control::serve(listener, self.events.clone());
        }
        self.install_signal_watcher()?;

        let names: Vec<String> = self.services.keys().cloned().collect();
        for name in names {
            self.start_service(&name);
        }

        while !self.shutdown {
            self.step(IDLE_WAIT);
        }

        if let Some(ListenAddr::Unix(path)) = &self.listen {
            let _ = std::fs::remove_file(path);
        }
        Ok(())
    }

    fn install_signal_watcher(&self) -> Result<(), SupervisorError> {
        let mut signals = Signals::new([SIGTERM, SIGINT, SIGHUP])?;
        let events = self.events.clone();
        thread::spawn(move || {
            for signal in signals.forever() {
                if events.send(Event::Signal(signal)).is_err() {
                    break;
                }
            }
        });
        Ok(())
    }

    /// One loop iteration: wait for the next event no longer than the
    /// nearest timer deadline (capped at `cap`), then fire due timers.
    fn step(&mut self, cap: Duration) {
        let timeout = match self.next_deadline() {
            Some(due) => due.saturating_duration_since(Instant::now()).min(cap),
            None => cap,
        };

        match self.inbox.recv_timeout(timeout) {
            Ok(event) => self.handle_event(event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => self.shutdown = true,
        }

        self.fire_due_timers();
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::ChildExit { service, pid, code } => {
                self.handle_child_exit(&service, pid, code)
            }
            Event::Signal(signum) => self.handle_signal(signum),
            Event::Request { conn, line, reply } => {
                debug!(conn, line = %line, "control request");
                let _ = reply.send(self.dispatch(&line));
            }
            Event::Connected { conn, peer } => {
                self.sessions.insert(conn, peer);
                debug!(conn, open = self.sessions.len(), "control session opened");
            }
            Event::Disconnected { conn } => {
                self.sessions.remove(&conn);
                debug!(conn, open = self.sessions.len(), "control session closed");
            }
            Event::Shutdown => {
                let count = self.signal_children(Signal::SIGTERM);
                info!(children = count, "shutdown requested");
                self.shutdown = true;
            }
        }
    }

    /// Spawns a service child and arms its start-wait check. A spawn
    /// failure is treated like an immediate crash and feeds the restart
    /// policy; the supervisor itself never aborts over it.
    fn start_service(&mut self, name: &str) {
        let Some(svc) = self.services.get_mut(name) else {
            return;
        };
        svc.start_count += 1;
        let generation = svc.bump_generation();
        let start_wait = svc.config.start_wait_duration();
        let attempt = svc.start_count;

        let spawned = ChildCredentials::resolve(&svc.config, self.umask)
            .and_then(|creds| spawn::spawn_service(&svc.config, creds));

        match spawned {
            Ok(pid) => {
                svc.pid = Some(pid);
                svc.state = ServiceState::Start;
                svc.start_ts = Some(Instant::now());
                debug!(service = name, pid, attempt, "service spawned");
                spawn::watch_child(name.to_string(), pid, self.events.clone());
                self.arm_timer(
                    start_wait,
                    TimerAction::StartWait {
                        service: name.to_string(),
                        generation,
                    },
                );
            }
            Err(err) => {
                debug!(service = name, attempt, error = %err, "spawn failed");
                svc.pid = None;
                self.apply_restart_policy(name);
            }
        }
    }

    /// Decides what a crashed service does next: `fatal` when the retry
    /// budget is spent (or restart is disabled), otherwise a delayed
    /// restart. Negative budgets retry without bound.
    fn apply_restart_policy(&mut self, name: &str) {
        let Some(svc) = self.services.get_mut(name) else {
            return;
        };
        let retries = svc.config.start_retries;
        if retries == 0 || (retries > 0 && svc.start_count >= retries) {
            svc.state = ServiceState::Fatal;
            warn!(
                service = name,
                attempts = svc.start_count,
                "retry budget exhausted; service is fatal"
            );
            return;
        }

        svc.state = ServiceState::Restart;
        let generation = svc.bump_generation();
        let delay = svc.config.restart_delay_duration();
        debug!(service = name, attempt = svc.start_count, "restart scheduled");
        self.arm_timer(
            delay,
            TimerAction::Restart {
                service: name.to_string(),
                generation,
            },
        );
    }

    fn handle_child_exit(&mut self, name: &str, pid: u32, code: i32) {
        let enter_restart_path = {
            let Some(svc) = self.services.get_mut(name) else {
                return;
            };
            if svc.pid != Some(pid) {
                return;
            }
            svc.pid = None;
            svc.last_status = Some(code);
            // The exit invalidates any pending start/stop-wait check.
            svc.bump_generation();
            debug!(service = name, pid, code, "child exited");

            if svc.state == ServiceState::Stop {
                svc.start_count = 0;
                svc.state = ServiceState::Down;
                debug!(service = name, "service stopped");
                false
            } else if svc.once {
                svc.start_count = 0;
                svc.state = ServiceState::Fatal;
                debug!(service = name, "one-shot service finished");
                false
            } else {
                true
            }
        };

        if enter_restart_path {
            self.apply_restart_policy(name);
        }
    }

    /// Sends TERM to a running child and arms the KILL escalation when
    /// the service carries a stop grace. Returns whether TERM was
    /// delivered.
    fn stop_service(&mut self, name: &str) -> bool {
        let Some(svc) = self.services.get_mut(name) else {
            return false;
        };
        let Some(pid) = svc.pid else {
            return false;
        };

        svc.state = ServiceState::Stop;
        // Entering stop cancels any outstanding start-wait check.
        let generation = svc.bump_generation();
        let stop_wait = svc.config.stop_wait_duration();
        let delivered = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok();
        debug!(service = name, pid, delivered, "stop requested");

        if !stop_wait.is_zero() {
            self.arm_timer(
                stop_wait,
                TimerAction::StopWait {
                    service: name.to_string(),
                    generation,
                },
            );
        }
        delivered
    }

    fn handle_signal(&mut self, signum: i32) {
        match signum {
            SIGTERM => {
                let count = self.signal_children(Signal::SIGTERM);
                info!(children = count, "TERM received; shutting down");
                self.shutdown = true;
            }
            SIGINT => {
                let count = self.signal_children(Signal::SIGINT);
                if count == 0 {
                    info!("INT received with no live children; shutting down");
                    self.shutdown = true;
                } else {
                    debug!(children = count, "INT forwarded to children");
                }
            }
            SIGHUP => {
                let count = self.signal_children(Signal::SIGHUP);
                debug!(children = count, "HUP forwarded to children");
            }
            _ => {}
        }
    }

    /// Delivers `signal` to every live child. Entries without a pid are
    /// skipped; the return value counts successful deliveries.
    fn signal_children(&self, signal: Signal) -> usize {
        let mut signalled = 0;
        for svc in self.services.values() {
            let Some(pid) = svc.pid else {
                continue;
            };
            if signal::kill(Pid::from_raw(pid as i32), signal).is_ok() {
                signalled += 1;
            }
        }
        signalled
    }

    fn arm_timer(&mut self, delay: Duration, action: TimerAction) {
        self.timer_seq += 1;
        self.timers.push(Reverse(Timer {
            due: Instant::now() + delay,
            seq: self.timer_seq,
            action,
        }));
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timers.peek().map(|Reverse(timer)| timer.due)
    }

    fn fire_due_timers(&mut self) {
        loop {
            match self.timers.peek() {
                Some(Reverse(timer)) if timer.due <= Instant::now() => {}
                _ => break,
            }
            if let Some(Reverse(timer)) = self.timers.pop() {
                self.fire_timer(timer.action);
            }
        }
    }

    fn fire_timer(&mut self, action: TimerAction) {
        match action {
            TimerAction::StartWait {
                service,
                generation,
            } => {
                let Some(svc) = self.services.get_mut(&service) else {
                    return;
                };
                if svc.generation != generation {
                    return;
                }
                if let Some(pid) = svc.pid {
                    svc.state = ServiceState::Up;
                    svc.start_count = 0;
                    info!(service = %service, pid, "service up");
                } else {
                    svc.state = ServiceState::Fail;
                    debug!(service = %service, "start-wait check found no child");
                }
            }
            TimerAction::StopWait {
                service,
                generation,
            } => {
                let Some(svc) = self.services.get(&service) else {
                    return;
                };
                if svc.generation != generation {
                    return;
                }
                if let Some(pid) = svc.pid {
                    debug!(service = %service, pid, "stop grace expired; sending KILL");
                    let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
                }
            }
            TimerAction::Restart {
                service,
                generation,
            } => {
                let current = self.services.get(&service).map(|svc| svc.generation);
                if current != Some(generation) {
                    return;
                }
                self.start_service(&service);
            }
        }
    }

    /// Resolves one protocol request into its response lines. The
    /// original line is echoed back in front of the result token.
    fn dispatch(&mut self, line: &str) -> Vec<String> {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some("status"), None, None) => self.status_lines(),
            (Some(verb), Some(name), None) => {
                let Ok(verb) = verb.parse::<Verb>() else {
                    return vec![format!("{line} unknown")];
                };
                if !self.services.contains_key(name) {
                    return vec![format!("{line} unknown")];
                }
                let name = name.to_string();
                let result = self.apply_verb(verb, &name);
                vec![format!("{line} {result}")]
            }
            _ => vec![format!("{line} unknown")],
        }
    }

    fn status_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .services
            .values()
            .map(|svc| format!("{} {}", svc.config.name, svc.status_token()))
            .collect();
        lines.sort();
        lines
    }

    fn apply_verb(&mut self, verb: Verb, name: &str) -> String {
        match verb {
            Verb::Up => self.start_for_operator(name, false),
            Verb::Once => self.start_for_operator(name, true),
            Verb::Down => {
                if self.stop_service(name) {
                    "1".to_string()
                } else {
                    "fail".to_string()
                }
            }
            Verb::Status => self
                .services
                .get(name)
                .map(|svc| svc.status_token())
                .unwrap_or_else(|| "unknown".to_string()),
            other => {
                let Some(signal) = other.signal() else {
                    return "fail".to_string();
                };
                let Some(pid) = self.services.get(name).and_then(|svc| svc.pid) else {
                    return "fail".to_string();
                };
                match signal::kill(Pid::from_raw(pid as i32), signal) {
                    Ok(()) => "1".to_string(),
                    Err(_) => "fail".to_string(),
                }
            }
        }
    }

    /// `up`/`once`: only acts when no child is running. An operator
    /// start opens a fresh retry burst, so a service parked in `fatal`
    /// gets its full budget back.
    fn start_for_operator(&mut self, name: &str, once: bool) -> String {
        {
            let Some(svc) = self.services.get_mut(name) else {
                return "fail".to_string();
            };
            if svc.pid.is_some() {
                return "fail".to_string();
            }
            svc.once = once;
            svc.start_count = 0;
        }
        self.start_service(name);
        match self.services.get(name).and_then(|svc| svc.pid) {
            Some(pid) => pid.to_string(),
            None => "fail".to_string(),
        }
    }
}
