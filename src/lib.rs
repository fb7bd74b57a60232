//! Lightweight multi-service supervisor with a line-based control
//! socket.
//!
//! `svman` runs a declared set of long-lived commands as child
//! processes, restarts crashed ones under a per-service retry budget,
//! fans operator signals out to every live child, and answers a small
//! ASCII protocol on a Unix or TCP control socket.

#![warn(unused_crate_dependencies)]
// These dependencies are only used in the binary (src/bin/main.rs).
// Test dependencies are only used in test code.
#[cfg(test)]
use assert_cmd as _;
use clap as _;
#[cfg(test)]
use predicates as _;

/// Configuration shape, validation, and defaults.
pub mod config;

/// Default policy values and protocol limits.
pub mod constants;

/// Control endpoint: listener, sessions, and protocol verbs.
pub mod control;

/// Errors.
pub mod error;

/// Logger initialisation.
pub mod logger;

/// Credential handling for service children.
pub mod privilege;

/// Per-service state machine records.
pub mod service;

/// Child spawning and exit watching.
mod spawn;

/// The supervision engine.
pub mod supervisor;
