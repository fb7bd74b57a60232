use std::time::Instant;

use crate::config::ServiceConfig;

/// Lifecycle state of one supervised service.
///
/// `fatal` is terminal for the supervisor: the service is only revived
/// by an operator `up`/`once` over the control socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ServiceState {
    Down,
    Start,
    Up,
    Restart,
    Stop,
    Fail,
    Fatal,
}

/// Mutable runtime record for one declared service. Owned by the
/// supervisor loop; sessions only ever see rendered status tokens.
#[derive(Debug)]
pub struct Service {
    /// Immutable policy from the configuration.
    pub config: ServiceConfig,
    /// Current lifecycle state.
    pub state: ServiceState,
    /// Pid of the live child, if any.
    pub pid: Option<u32>,
    /// Consecutive start attempts in the current retry burst.
    pub start_count: i32,
    /// When the most recent child was spawned.
    pub start_ts: Option<Instant>,
    /// Exit code of the last child (code byte; signal deaths record 0).
    pub last_status: Option<i32>,
    /// When set, a natural exit parks the service in `fatal` instead of
    /// entering the restart path.
    pub once: bool,
    /// Timer/watcher generation. Bumping it invalidates every pending
    /// timer armed for this service.
    pub(crate) generation: u64,
}

impl Service {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            state: ServiceState::Down,
            pid: None,
            start_count: 0,
            start_ts: None,
            last_status: None,
            once: false,
            generation: 0,
        }
    }

    /// Seconds since the current child was spawned.
    pub fn uptime_secs(&self) -> u64 {
        self.start_ts
            .map(|ts| ts.elapsed().as_secs())
            .unwrap_or(0)
    }

    /// Renders the wire status tuple: `state pid uptime` while a child
    /// is alive, `state count` mid retry burst, bare state otherwise.
    pub fn status_token(&self) -> String {
        match self.pid {
            Some(pid) => format!("{} {} {}", self.state, pid, self.uptime_secs()),
            None => match self.state {
                ServiceState::Start | ServiceState::Restart | ServiceState::Fail
                    if self.start_count > 0 =>
                {
                    format!("{} {}", self.state, self.start_count)
                }
                state => state.to_string(),
            },
        }
    }

    pub(crate) fn bump_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }
}
