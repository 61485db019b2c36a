//! Validity flag for a connection's entry in the readiness poll.
//!
//! The event loop owns the poll registration itself; workers only ever flip
//! this flag.  Between `poll()` returning and the loop looking at an event, a
//! worker may already have cancelled the connection, so the loop re-checks
//! [`Registration::is_valid`] before acting on every event.

use std::sync::atomic::{AtomicBool, Ordering};

/// Marks whether a connection may still be handed to a worker.
#[derive(Debug)]
pub struct Registration {
    valid: AtomicBool,
}

impl Default for Registration {
    fn default() -> Self {
        Self::new()
    }
}

impl Registration {
    pub fn new() -> Self {
        Self {
            valid: AtomicBool::new(true),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Invalidates the registration.
    ///
    /// Returns `true` only for the one call that performed the invalidation;
    /// later calls are no-ops that return `false`.
    pub fn cancel(&self) -> bool {
        self.valid
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
