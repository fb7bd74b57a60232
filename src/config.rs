use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_yaml::Value;

use crate::constants::{
    DEFAULT_RESTART_DELAY, DEFAULT_START_RETRIES, DEFAULT_START_WAIT, DEFAULT_STOP_WAIT,
};
use crate::control::ListenAddr;
use crate::error::ConfigError;

/// Validated policy for one declared service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Unique name, taken from the service's key in the `run` mapping.
    pub name: String,
    /// Command line, executed through the platform shell.
    pub cmd: String,
    /// Restart budget: 0 disables restart, positive caps consecutive
    /// attempts, negative retries without bound.
    pub start_retries: i32,
    /// Seconds between a crash and the next start attempt.
    pub restart_delay: f64,
    /// Seconds a child must survive before it counts as up.
    pub start_wait: f64,
    /// Seconds between TERM and KILL when stopping; 0 means TERM only.
    pub stop_wait: f64,
    /// Octal mask applied in the child before exec.
    pub umask: Option<u32>,
    /// Account to switch to in the child before exec.
    pub user: Option<String>,
    /// Group to switch to in the child before exec.
    pub group: Option<String>,
}

impl ServiceConfig {
    pub fn restart_delay_duration(&self) -> Duration {
        Duration::from_secs_f64(self.restart_delay)
    }

    pub fn start_wait_duration(&self) -> Duration {
        Duration::from_secs_f64(self.start_wait)
    }

    pub fn stop_wait_duration(&self) -> Duration {
        Duration::from_secs_f64(self.stop_wait)
    }
}

/// Logger configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogSettings {
    /// Numeric level 1..9 (fatal..trace).
    pub level: Option<u8>,
    /// Append-mode log file; stdout when absent.
    pub file: Option<PathBuf>,
    /// Timestamp format string for log lines.
    pub ts_format: Option<String>,
}

/// Fully validated supervisor configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Service table keyed by name.
    pub services: HashMap<String, ServiceConfig>,
    /// Control endpoint; the supervisor runs without a control socket
    /// when absent.
    pub listen: Option<ListenAddr>,
    /// Supervisor-wide umask that children inherit unless they carry
    /// their own.
    pub umask: Option<u32>,
    /// Logger configuration.
    pub log: LogSettings,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    run: Option<Value>,
    #[serde(default)]
    global: RawGlobal,
    #[serde(default)]
    log: LogSettings,
}

#[derive(Debug, Default, Deserialize)]
struct RawGlobal {
    listen: Option<String>,
    umask: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawService {
    cmd: Option<String>,
    start_retries: Option<i32>,
    restart_delay: Option<f64>,
    start_wait: Option<f64>,
    stop_wait: Option<f64>,
    umask: Option<String>,
    user: Option<String>,
    group: Option<String>,
}

impl Settings {
    /// Loads and validates the configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
        Self::from_yaml(&content)
    }

    /// Validates a configuration from in-memory YAML.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(content)?;
        validate(raw)
    }
}

fn validate(raw: RawConfig) -> Result<Settings, ConfigError> {
    let run = raw.run.ok_or(ConfigError::CommandsNotMap)?;
    if !run.is_mapping() {
        return Err(ConfigError::CommandsNotMap);
    }
    let entries: HashMap<String, Value> =
        serde_yaml::from_value(run).map_err(|_| ConfigError::CommandsNotMap)?;
    if entries.is_empty() {
        return Err(ConfigError::MissingCommandList);
    }

    let mut services = HashMap::with_capacity(entries.len());
    for (name, value) in entries {
        let service = validate_service(&name, value)?;
        services.insert(name, service);
    }

    let umask = match raw.global.umask {
        Some(mask) => Some(parse_umask("global", &mask)?),
        None => None,
    };

    Ok(Settings {
        services,
        listen: raw.global.listen.as_deref().map(ListenAddr::parse),
        umask,
        log: raw.log,
    })
}

fn validate_service(name: &str, value: Value) -> Result<ServiceConfig, ConfigError> {
    if is_falsy(&value) {
        return Err(ConfigError::MissingCommand(name.to_string()));
    }

    // A bare string is shorthand for a service with only a command.
    let raw = match value {
        Value::String(cmd) => RawService {
            cmd: Some(cmd),
            start_retries: None,
            restart_delay: None,
            start_wait: None,
            stop_wait: None,
            umask: None,
            user: None,
            group: None,
        },
        Value::Mapping(_) => serde_yaml::from_value(value)?,
        _ => return Err(ConfigError::MissingCommand(name.to_string())),
    };

    let cmd = match raw.cmd {
        Some(cmd) if !cmd.is_empty() => cmd,
        _ => return Err(ConfigError::MissingCommand(name.to_string())),
    };

    let umask = match raw.umask {
        Some(mask) => Some(parse_umask(name, &mask)?),
        None => None,
    };

    Ok(ServiceConfig {
        name: name.to_string(),
        cmd,
        start_retries: raw.start_retries.unwrap_or(DEFAULT_START_RETRIES),
        restart_delay: positive_or(raw.restart_delay, DEFAULT_RESTART_DELAY),
        start_wait: positive_or(raw.start_wait, DEFAULT_START_WAIT),
        stop_wait: non_negative_or(raw.stop_wait, DEFAULT_STOP_WAIT),
        umask,
        user: raw.user,
        group: raw.group,
    })
}

fn positive_or(value: Option<f64>, default: f64) -> f64 {
    match value {
        Some(v) if v > 0.0 => v,
        _ => default,
    }
}

fn non_negative_or(value: Option<f64>, default: f64) -> f64 {
    match value {
        Some(v) if v >= 0.0 => v,
        _ => default,
    }
}

fn parse_umask(owner: &str, mask: &str) -> Result<u32, ConfigError> {
    u32::from_str_radix(mask, 8).map_err(|_| ConfigError::InvalidUmask {
        service: owner.to_string(),
        mask: mask.to_string(),
    })
}

/// Mirrors the truthiness rules of the config language: null, false,
/// empty strings, and zero all reject a service entry.
fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty() || s == "0",
        Value::Number(n) => n.as_f64() == Some(0.0),
        _ => false,
    }
}
