//! Per-connection state shared between the event loop and the workers.
//!
//! A [`Connection`] is created by the event loop when a client is accepted
//! and lives in the loop's connection map (behind an `Arc`) until the loop
//! deregisters it.  Workers receive clones of the `Arc` through the
//! dispatcher.
//!
//! # One task at a time
//!
//! [`DispatchState`] is a tiny lock-free state machine that lets the loop and
//! the workers agree on whether a task for this connection is queued or
//! running:
//!
//! ```text
//!            schedule()                 schedule()
//!   Idle ───────────────► Scheduled ───────────────► Rescheduled
//!    ▲                     │     ▲                        │
//!    │  finish_run()=false │     │  finish_run()=true     │
//!    └─────────────────────┘     └────────────────────────┘
//! ```
//!
//! Only the `Idle → Scheduled` transition submits work.  Readiness that
//! arrives while a task is queued or running is coalesced into
//! `Rescheduled`, and the worker runs the handler once more before letting
//! go.  Because mio readiness is edge-triggered this is enough to never
//! miss data, and it keeps two workers from ever touching the same socket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard};

use mio::net::TcpStream;
use mio::Token;
use overseer_core::{LineBuffer, Session};

use super::registration::Registration;

const IDLE: u8 = 0;
const SCHEDULED: u8 = 1;
const RESCHEDULED: u8 = 2;

/// Tracks whether a handler task for a connection is queued or running.
#[derive(Debug, Default)]
pub struct DispatchState {
    state: AtomicU8,
}

impl DispatchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records new readiness.
    ///
    /// Returns `true` if the caller must submit a task, `false` if one is
    /// already queued or running and will pick the readiness up.
    pub fn schedule(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let next = match current {
                IDLE => SCHEDULED,
                SCHEDULED => RESCHEDULED,
                _ => return false,
            };
            match self
                .state
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return current == IDLE,
                Err(actual) => current = actual,
            }
        }
    }

    /// Called by the worker after one handler run.
    ///
    /// Returns `true` if readiness was coalesced while the handler ran and
    /// the worker must run it again.
    pub fn finish_run(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let next = match current {
                RESCHEDULED => SCHEDULED,
                _ => IDLE,
            };
            match self
                .state
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return current == RESCHEDULED,
                Err(actual) => current = actual,
            }
        }
    }

    /// Returns to `Idle` after a submission was rejected.
    pub fn unschedule(&self) {
        self.state.store(IDLE, Ordering::Release);
    }

    pub fn is_idle(&self) -> bool {
        self.state.load(Ordering::Acquire) == IDLE
    }
}

/// Socket, buffer and session for one client.  Guarded by the connection's mutex.
#[derive(Debug)]
pub struct ConnectionIo {
    /// `None` once the handler has handed the socket back for closing.
    pub stream: Option<TcpStream>,
    pub inbound: LineBuffer,
    pub session: Session,
    /// Whether the greeting has been written yet.
    pub greeted: bool,
}

/// An accepted client.  Its identity is its poll token.
#[derive(Debug)]
pub struct Connection {
    token: Token,
    peer: SocketAddr,
    registration: Registration,
    dispatch: DispatchState,
    io: Mutex<ConnectionIo>,
}

impl Connection {
    pub fn new(token: Token, peer: SocketAddr, stream: TcpStream, session: Session) -> Self {
        Self {
            token,
            peer,
            registration: Registration::new(),
            dispatch: DispatchState::new(),
            io: Mutex::new(ConnectionIo {
                stream: Some(stream),
                inbound: LineBuffer::new(),
                session,
                greeted: false,
            }),
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    pub fn dispatch(&self) -> &DispatchState {
        &self.dispatch
    }

    /// Locks the I/O state, recovering from a poisoned lock.
    ///
    /// A worker that panicked mid-handler leaves the session in whatever
    /// state it reached; the next run still sees a consistent struct.
    pub fn lock_io(&self) -> MutexGuard<'_, ConnectionIo> {
        match self.io.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Locks the I/O state only if no worker currently holds it.
    pub fn try_lock_io(&self) -> Option<MutexGuard<'_, ConnectionIo>> {
        match self.io.try_lock() {
            Ok(guard) => Some(guard),
            Err(std::sync::TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(std::sync::TryLockError::WouldBlock) => None,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
