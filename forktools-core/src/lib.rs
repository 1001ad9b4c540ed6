//! # forktools-core
//!
//! Core library for forktools - maintenance tooling for a downstream fork of
//! the Envoy proxy.
//!
//! Each tool is a leaf module: [`changelog`] mines git tags into changelog
//! entries, [`prune`] trims the dependency manifest, [`coredump`] and
//! [`debugger`] triage crash dumps, and [`logcss`] highlights diagrams from
//! logs. External commands are wrapped by [`git`] and [`process`] so the
//! parsing logic can be tested on plain text.

pub mod changelog;
pub mod config;
pub mod coredump;
pub mod debugger;
pub mod diff;
pub mod error;
pub mod git;
pub mod logcss;
pub mod manifest;
pub mod process;
pub mod prune;

pub use config::Config;
pub use error::{Error, Result};
pub use git::{Git, LogEntry, OnelineCommit};
