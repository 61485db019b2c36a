//! Dispatcher: a fixed pool of worker threads fed by a bounded queue.
//!
//! The event loop calls [`Dispatcher::submit`] for every readable connection.
//! Submission goes through the connection's [`DispatchState`] first, so a
//! connection that already has a task queued or running is coalesced rather
//! than queued twice.  The queue itself is a bounded crossbeam channel; when
//! it is full the submission is rejected with [`DispatchError::QueueFull`]
//! and the caller decides when to retry.
//!
//! [`DispatchState`]: super::connection::DispatchState

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::connection::Connection;
use super::handler::ConnectionHandler;

/// How often `shutdown` checks whether the workers have exited.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The unit of work a worker runs for one connection.
pub trait ConnectionWork: Send + Sync + 'static {
    fn run(&self, conn: &Connection);
}

impl ConnectionWork for ConnectionHandler {
    fn run(&self, conn: &Connection) {
        self.handle(conn);
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("worker queue is full")]
    QueueFull,
    #[error("dispatcher has shut down")]
    Closed,
}

/// What [`Dispatcher::submit`] did with an accepted submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    /// A new task was queued.
    Queued,
    /// A task for this connection was already pending and will see the readiness.
    Coalesced,
}

/// Outcome of [`Dispatcher::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// `true` if every worker exited within the timeout.
    pub drained: bool,
    /// Workers still running when the timeout expired.  They are detached.
    pub abandoned_workers: usize,
}

pub struct Dispatcher {
    sender: Sender<Arc<Connection>>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.workers.len())
            .field("queued", &self.sender.len())
            .finish()
    }
}

impl Dispatcher {
    /// Spawns `workers` threads sharing a queue of `queue_capacity` slots.
    ///
    /// # Errors
    ///
    /// Returns the OS error if a worker thread cannot be spawned.  Threads
    /// already started exit once the partially built pool is dropped.
    pub fn start(
        workers: usize,
        queue_capacity: usize,
        work: Arc<dyn ConnectionWork>,
    ) -> std::io::Result<Self> {
        let (sender, receiver) = crossbeam_channel::bounded(queue_capacity.max(1));
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers.max(1) {
            let receiver = receiver.clone();
            let work = Arc::clone(&work);
            let handle = std::thread::Builder::new()
                .name(format!("overseer-worker-{id}"))
                .spawn(move || worker_loop(id, receiver, work))?;
            handles.push(handle);
        }
        info!(
            "dispatcher started with {} workers, queue capacity {}",
            handles.len(),
            queue_capacity.max(1)
        );
        Ok(Self {
            sender,
            workers: handles,
        })
    }

    /// Hands `conn` to the pool.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::QueueFull`] if the queue has no free slot.  The
    ///   connection is left idle so a later submit can schedule it.
    /// - [`DispatchError::Closed`] if every worker has gone away.
    pub fn submit(&self, conn: &Arc<Connection>) -> Result<Submitted, DispatchError> {
        if !conn.dispatch().schedule() {
            return Ok(Submitted::Coalesced);
        }
        match self.sender.try_send(Arc::clone(conn)) {
            Ok(()) => Ok(Submitted::Queued),
            Err(TrySendError::Full(_)) => {
                conn.dispatch().unschedule();
                warn!(
                    "worker queue full ({} slots); rejected task for {}",
                    self.sender.capacity().unwrap_or(0),
                    conn.peer()
                );
                Err(DispatchError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => {
                conn.dispatch().unschedule();
                Err(DispatchError::Closed)
            }
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stops accepting work and waits up to `timeout` for queued and
    /// in-flight tasks to finish.
    pub fn shutdown(self, timeout: Duration) -> DrainReport {
        let Self { sender, workers } = self;
        // Workers drain what is already queued, then see the disconnect.
        drop(sender);

        let deadline = Instant::now() + timeout;
        let mut pending = workers;
        loop {
            let (finished, running): (Vec<_>, Vec<_>) =
                pending.into_iter().partition(|h| h.is_finished());
            for handle in finished {
                if handle.join().is_err() {
                    error!("worker thread panicked outside a task");
                }
            }
            pending = running;
            if pending.is_empty() || Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(DRAIN_POLL_INTERVAL);
        }

        let abandoned_workers = pending.len();
        if abandoned_workers > 0 {
            warn!("{abandoned_workers} workers still busy after {timeout:?}; detaching them");
        } else {
            debug!("all workers drained");
        }
        DrainReport {
            drained: abandoned_workers == 0,
            abandoned_workers,
        }
    }
}

fn worker_loop(id: usize, receiver: Receiver<Arc<Connection>>, work: Arc<dyn ConnectionWork>) {
    debug!("worker {id} started");
    while let Ok(conn) = receiver.recv() {
        loop {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| work.run(&conn)));
            if outcome.is_err() {
                error!("worker {id}: task for {} panicked", conn.peer());
            }
            if !conn.dispatch().finish_run() {
                break;
            }
        }
    }
    debug!("worker {id} exiting");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
