//! Cooperative shutdown signal shared by every long-running loop.
//!
//! A [`ShutdownSignal`] is a cloneable cancellation token.  One clone is kept
//! by whoever orchestrates shutdown; the others are handed to the event loop,
//! the beacon threads, and anything else that must stop when asked.
//!
//! # How it works
//!
//! The signal combines two things:
//!
//! - An `AtomicBool` that loops poll cheaply between units of work.
//! - A crossbeam channel whose only sender is dropped on [`trigger`].  A
//!   thread parked in [`wait_timeout`] is blocked in `recv_timeout` on that
//!   channel; dropping the sender disconnects it and wakes every waiter at
//!   once.  This makes interval sleeps interruptible without polling.
//!
//! [`trigger`]: ShutdownSignal::trigger
//! [`wait_timeout`]: ShutdownSignal::wait_timeout

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

struct Inner {
    triggered: AtomicBool,
    sender: Mutex<Option<Sender<()>>>,
}

/// A cloneable, idempotent cancellation token.
#[derive(Clone)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
    receiver: Receiver<()>,
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    /// Creates an untriggered signal.
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(Inner {
                triggered: AtomicBool::new(false),
                sender: Mutex::new(Some(sender)),
            }),
            receiver,
        }
    }

    /// Requests shutdown.  Calling this more than once has no further effect.
    pub fn trigger(&self) {
        self.inner.triggered.store(true, Ordering::SeqCst);
        // A poisoned lock still holds the sender; take it anyway.
        let mut guard = match self.inner.sender.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.take();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Blocks for up to `timeout` or until the signal is triggered.
    ///
    /// Returns `true` if shutdown was requested, `false` if the full timeout
    /// elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_triggered() {
            return true;
        }
        match self.receiver.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => self.is_triggered(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
