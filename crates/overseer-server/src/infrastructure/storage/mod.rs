//! Storage infrastructure: configuration file and persistent event log.
//!
//! - **`config`** reads the TOML settings file, writing a documented default
//!   file on first run.
//! - **`event_log`** appends timestamped lines to the server log file and
//!   never lets a write failure reach the caller.

pub mod config;
pub mod event_log;
