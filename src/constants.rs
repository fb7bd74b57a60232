//! Default policy values and protocol limits for the svman supervisor.

use std::time::Duration;

/// Default cap on consecutive restart attempts before a service goes fatal.
pub const DEFAULT_START_RETRIES: i32 = 8;

/// Default pause between a crash and the next start attempt, in seconds.
pub const DEFAULT_RESTART_DELAY: f64 = 1.0;

/// Default grace period after a spawn before a service counts as up, in seconds.
pub const DEFAULT_START_WAIT: f64 = 1.0;

/// Default grace period between TERM and KILL when stopping, in seconds.
/// Zero disables the forced KILL entirely.
pub const DEFAULT_STOP_WAIT: f64 = 0.0;

/// Control sessions are dropped after this long without a request.
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Cap on a single protocol line, request or response, in bytes.
pub const MAX_LINE_BYTES: usize = 64;

/// Environment variable that forces the logger to debug when set truthy.
pub const DEBUG_ENV_VAR: &str = "SV_DEBUG";

/// How long the event loop sleeps when it has no pending timers.
pub(crate) const IDLE_WAIT: Duration = Duration::from_secs(3600);
