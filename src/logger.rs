//! Logger initialisation: numeric level mapping, sink selection, and
//! timestamp formatting.

use std::env;
use std::fs;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::ChronoLocal;

use crate::config::LogSettings;
use crate::constants::DEBUG_ENV_VAR;

/// Maps the configuration's numeric levels 1..9 (fatal..trace) onto
/// subscriber level filters.
pub fn level_filter(level: u8) -> LevelFilter {
    match level {
        0 => LevelFilter::OFF,
        1..=4 => LevelFilter::ERROR,
        5 => LevelFilter::WARN,
        6 | 7 => LevelFilter::INFO,
        8 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// True when `SV_DEBUG` is set truthy: present, non-empty, not `"0"`.
pub fn debug_forced() -> bool {
    match env::var(DEBUG_ENV_VAR) {
        Ok(value) => !value.is_empty() && value != "0",
        Err(_) => false,
    }
}

/// Initialises the global subscriber from the log settings. `SV_DEBUG`
/// overrides the configured level; with neither, `RUST_LOG` or info
/// applies. Safe to call more than once; later calls are no-ops.
pub fn init(settings: &LogSettings) {
    let filter = if debug_forced() {
        EnvFilter::new(LevelFilter::DEBUG.to_string())
    } else if let Some(level) = settings.level {
        EnvFilter::new(level_filter(level).to_string())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let timer = match &settings.ts_format {
        Some(format) => ChronoLocal::new(format.clone()),
        None => ChronoLocal::rfc_3339(),
    };

    match &settings.file {
        Some(path) => {
            let file = match fs::OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => file,
                Err(err) => {
                    eprintln!("svman: failed to open log file {path:?}: {err}");
                    let _ = tracing_subscriber::fmt()
                        .with_env_filter(filter)
                        .with_timer(timer)
                        .try_init();
                    return;
                }
            };
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_timer(timer)
                .with_ansi(false)
                .with_writer(move || file.try_clone().expect("log file handle"))
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_timer(timer)
                .try_init();
        }
    }
}
