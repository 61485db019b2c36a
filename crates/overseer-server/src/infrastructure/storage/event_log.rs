//! Persistent, append-only event log.
//!
//! Operational messages go to `tracing` like everything else.  The event log
//! is a separate audit trail of what clients did (connections, password
//! attempts, beacons seen) written as one timestamped line per event:
//!
//! ```text
//! 2026-10-18 14:03:07 | Client connected: 127.0.0.1:51234
//! 2026-10-18 14:03:09 | Wrong password attempt from 127.0.0.1:51234
//! ```
//!
//! Recording an event must never fail the caller.  [`FileEventLog`] reports
//! write errors through `tracing::error!` and carries on.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;

/// Timestamp layout used for every line.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Sink for audit events.
///
/// Implementations must be callable from any thread and must swallow their
/// own failures.
#[cfg_attr(test, mockall::automock)]
pub trait EventLog: Send + Sync {
    fn record(&self, message: &str);
}

/// Appends timestamped lines to a file.
#[derive(Debug)]
pub struct FileEventLog {
    path: PathBuf,
    // Serialises appends so lines from different threads never interleave.
    write_lock: Mutex<()>,
}

impl FileEventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}

impl EventLog for FileEventLog {
    fn record(&self, message: &str) {
        let line = format_entry(&Local::now().format(TIMESTAMP_FORMAT).to_string(), message);
        let _guard = match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = self.append(&line) {
            tracing::error!("failed to write event log {}: {e}", self.path.display());
        }
    }
}

/// Keeps events in memory.  Used by tests and by embedders that do not want
/// a file.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    entries: Mutex<Vec<String>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every message recorded so far, oldest first.
    pub fn entries(&self) -> Vec<String> {
        self.lock().clone()
    }

    /// Returns `true` if any recorded message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lock().iter().any(|e| e.contains(needle))
    }

    /// Number of recorded messages containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.lock().iter().filter(|e| e.contains(needle)).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl EventLog for MemoryEventLog {
    fn record(&self, message: &str) {
        self.lock().push(message.to_string());
    }
}

fn format_entry(timestamp: &str, message: &str) -> String {
    format!("{timestamp} | {message}\n")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
