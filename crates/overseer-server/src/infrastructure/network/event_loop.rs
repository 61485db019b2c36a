//! EventLoop: the single readiness-polling thread.
//!
//! # Responsibilities
//!
//! - Owns the listening socket, the `mio::Poll` and every registration in
//!   it.  No other thread registers or deregisters anything.
//! - Accepts new clients, registers them for read interest and submits a
//!   first task so the greeting goes out immediately.
//! - Hands readable connections to the [`Dispatcher`].  It never reads or
//!   writes a client socket itself.
//! - Processes [`LoopCommand`]s from workers: a worker that closed a session
//!   sends the socket back here to be deregistered and dropped, and a worker
//!   that spent its read budget asks for the connection to be queued again.
//!
//! # Tokens
//!
//! | Token | Source |
//! |-------|--------|
//! | 0     | listening socket |
//! | 1     | [`mio::Waker`] used by [`LoopHandle`] |
//! | 2..   | accepted connections, never reused |
//!
//! # Shutdown
//!
//! After the [`ShutdownSignal`] is triggered and the loop is woken, `run`
//! deregisters and closes the listener, drains the worker pool within the
//! configured bound, then closes every connection still open.

use std::collections::HashMap;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use overseer_core::ShutdownSignal;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::connection::Connection;
use super::dispatcher::{ConnectionWork, DispatchError, Dispatcher};
use super::handler::{ConnectionHandler, HandlerSettings};
use crate::infrastructure::storage::event_log::EventLog;

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
const FIRST_CONNECTION_TOKEN: usize = 2;

const EVENTS_CAPACITY: usize = 1024;

/// Poll timeout used while rejected submissions are waiting for a retry.
const RETRY_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("failed to bind {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("event loop setup failed: {0}")]
    Setup(#[source] io::Error),
    #[error("failed to start worker pool: {0}")]
    Workers(#[source] io::Error),
    #[error("readiness poll failed: {0}")]
    Poll(#[source] io::Error),
}

/// Requests sent to the loop from other threads.
#[derive(Debug)]
pub enum LoopCommand {
    /// The worker closed this connection's session; deregister and drop the socket.
    Deregister { token: Token, stream: TcpStream },
    /// The worker yielded with input still pending; queue the connection again.
    Resubmit { token: Token },
}

/// Cloneable handle for talking to a running [`EventLoop`].
#[derive(Debug, Clone)]
pub struct LoopHandle {
    commands: Sender<LoopCommand>,
    waker: Arc<Waker>,
}

impl LoopHandle {
    pub(crate) fn new(commands: Sender<LoopCommand>, waker: Arc<Waker>) -> Self {
        Self { commands, waker }
    }

    /// Returns a closed connection's socket to the loop.
    ///
    /// If the loop has already exited the socket is simply dropped here,
    /// which closes it just the same.
    pub fn deregister(&self, token: Token, stream: TcpStream) {
        if self
            .commands
            .send(LoopCommand::Deregister { token, stream })
            .is_err()
        {
            debug!("event loop gone; closing {token:?} in place");
            return;
        }
        if let Err(e) = self.waker.wake() {
            warn!("failed to wake event loop: {e}");
        }
    }

    /// Asks the loop to submit `token` again.  Readiness is edge-triggered,
    /// so a run that stops before `WouldBlock` gets no further event by itself.
    pub fn resubmit(&self, token: Token) {
        if self.commands.send(LoopCommand::Resubmit { token }).is_err() {
            debug!("event loop gone; dropping resubmit for {token:?}");
            return;
        }
        if let Err(e) = self.waker.wake() {
            warn!("failed to wake event loop: {e}");
        }
    }

    /// Interrupts the current readiness poll.
    pub fn wake(&self) -> io::Result<()> {
        self.waker.wake()
    }
}

/// Tuning for the loop and its worker pool.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    /// Upper bound on waiting for workers at shutdown.
    pub drain_timeout: Duration,
    /// `None` blocks in the poll until something is ready.
    pub poll_interval: Option<Duration>,
}

/// What the loop cleaned up on its way out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Connections still open when the loop stopped and closed by it.
    pub closed_connections: usize,
    /// `true` if the worker pool drained within the timeout.
    pub drained: bool,
}

pub struct EventLoop {
    poll: Poll,
    listener: TcpListener,
    local_addr: SocketAddr,
    commands: Receiver<LoopCommand>,
    handler: Arc<ConnectionHandler>,
    dispatcher: Dispatcher,
    connections: HashMap<Token, Arc<Connection>>,
    /// Connections whose submission was rejected by a full queue.
    deferred: Vec<Token>,
    next_token: usize,
    settings: LoopSettings,
    event_log: Arc<dyn EventLog>,
    shutdown: ShutdownSignal,
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("local_addr", &self.local_addr)
            .field("connections", &self.connections.len())
            .field("deferred", &self.deferred.len())
            .finish()
    }
}

impl EventLoop {
    /// Binds the listener and starts the worker pool.
    ///
    /// # Errors
    ///
    /// [`NetworkError::BindFailed`] if the address is unavailable; the other
    /// variants if the poll, waker or worker threads cannot be created.
    pub fn bind(
        addr: SocketAddr,
        settings: LoopSettings,
        handler_settings: HandlerSettings,
        event_log: Arc<dyn EventLog>,
        shutdown: ShutdownSignal,
    ) -> Result<(Self, LoopHandle), NetworkError> {
        let poll = Poll::new().map_err(NetworkError::Setup)?;
        let mut listener =
            TcpListener::bind(addr).map_err(|source| NetworkError::BindFailed { addr, source })?;
        let local_addr = listener.local_addr().map_err(NetworkError::Setup)?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .map_err(NetworkError::Setup)?;

        let waker = Arc::new(Waker::new(poll.registry(), WAKER).map_err(NetworkError::Setup)?);
        let (tx, commands) = crossbeam_channel::unbounded();
        let handle = LoopHandle::new(tx, waker);

        let handler = Arc::new(ConnectionHandler::new(
            handler_settings,
            Arc::clone(&event_log),
            handle.clone(),
        ));
        let dispatcher = Dispatcher::start(
            settings.workers,
            settings.queue_capacity,
            Arc::clone(&handler) as Arc<dyn ConnectionWork>,
        )
        .map_err(NetworkError::Workers)?;

        info!("listening on {local_addr}");
        let event_loop = Self {
            poll,
            listener,
            local_addr,
            commands,
            handler,
            dispatcher,
            connections: HashMap::new(),
            deferred: Vec::new(),
            next_token: FIRST_CONNECTION_TOKEN,
            settings,
            event_log,
            shutdown,
        };
        Ok((event_loop, handle))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Runs until the shutdown signal is triggered, then tears everything down.
    ///
    /// # Errors
    ///
    /// [`NetworkError::Poll`] if the readiness poll itself fails.  Cleanup
    /// still runs before the error is returned.
    pub fn run(mut self) -> Result<ShutdownReport, NetworkError> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        let outcome = loop {
            if self.shutdown.is_triggered() {
                break Ok(());
            }
            let timeout = if self.deferred.is_empty() {
                self.settings.poll_interval
            } else {
                Some(RETRY_POLL_INTERVAL)
            };
            if let Err(e) = self.poll.poll(&mut events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!("readiness poll failed: {e}");
                break Err(NetworkError::Poll(e));
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept_ready(),
                    WAKER => {}
                    token => self.connection_ready(token),
                }
            }
            self.process_commands();
            self.retry_deferred();
        };

        let report = self.stop();
        outcome.map(|()| report)
    }

    fn accept_ready(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!("accept failed: {e}");
                    break;
                }
            }
        }
    }

    fn admit(&mut self, mut stream: TcpStream, peer: SocketAddr) {
        let token = Token(self.next_token);
        self.next_token += 1;

        if let Err(e) = self
            .poll
            .registry()
            .register(&mut stream, token, Interest::READABLE)
        {
            warn!("failed to register {peer}: {e}");
            return;
        }

        info!("client connected: {peer}");
        self.event_log.record(&format!("Client connected: {peer}"));
        let conn = Arc::new(Connection::new(token, peer, stream, self.handler.new_session()));
        self.connections.insert(token, Arc::clone(&conn));
        self.schedule(&conn);
    }

    fn connection_ready(&mut self, token: Token) {
        // A worker may have closed the connection after this poll returned.
        let Some(conn) = self.connections.get(&token).cloned() else {
            return;
        };
        if !conn.registration().is_valid() {
            return;
        }
        self.schedule(&conn);
    }

    fn schedule(&mut self, conn: &Arc<Connection>) {
        match self.dispatcher.submit(conn) {
            Ok(_) => {}
            Err(DispatchError::QueueFull) => {
                if !self.deferred.contains(&conn.token()) {
                    self.deferred.push(conn.token());
                }
            }
            Err(DispatchError::Closed) => {
                error!("worker pool is gone; cannot serve {}", conn.peer());
            }
        }
    }

    fn retry_deferred(&mut self) {
        if self.deferred.is_empty() {
            return;
        }
        for token in std::mem::take(&mut self.deferred) {
            if let Some(conn) = self.connections.get(&token).cloned() {
                if conn.registration().is_valid() {
                    self.schedule(&conn);
                }
            }
        }
    }

    /// Resubmit requests join the deferred list, which `retry_deferred`
    /// empties right after.
    fn process_commands(&mut self) {
        drain_commands(
            &self.commands,
            self.poll.registry(),
            &mut self.connections,
            &mut self.deferred,
        );
    }

    fn stop(self) -> ShutdownReport {
        let Self {
            poll,
            mut listener,
            local_addr,
            commands,
            handler,
            dispatcher,
            mut connections,
            settings,
            event_log,
            ..
        } = self;
        info!("event loop on {local_addr} stopping");

        // (a) + (b): no more accepts; the listening socket closes here.
        if let Err(e) = poll.registry().deregister(&mut listener) {
            debug!("listener deregistration failed: {e}");
        }
        drop(listener);

        // (c): let queued and in-flight tasks finish.
        drop(handler);
        let drain = dispatcher.shutdown(settings.drain_timeout);
        let mut resubmits = Vec::new();
        drain_commands(&commands, poll.registry(), &mut connections, &mut resubmits);

        // (d): close whatever is still open.
        let closed_connections =
            close_remaining(&mut connections, poll.registry(), event_log.as_ref());
        // Anything a detached worker managed to send back in the meantime.
        drain_commands(&commands, poll.registry(), &mut connections, &mut resubmits);

        info!(
            "event loop stopped: closed {closed_connections} connections, drained={}",
            drain.drained
        );
        ShutdownReport {
            closed_connections,
            drained: drain.drained,
        }
    }
}

fn drain_commands(
    commands: &Receiver<LoopCommand>,
    registry: &Registry,
    connections: &mut HashMap<Token, Arc<Connection>>,
    resubmits: &mut Vec<Token>,
) {
    while let Ok(command) = commands.try_recv() {
        match command {
            LoopCommand::Deregister { token, mut stream } => {
                if let Err(e) = registry.deregister(&mut stream) {
                    debug!("deregistration of {token:?} failed: {e}");
                }
                connections.remove(&token);
                // Dropping the stream closes the socket.
            }
            LoopCommand::Resubmit { token } => {
                if connections.contains_key(&token) && !resubmits.contains(&token) {
                    resubmits.push(token);
                }
            }
        }
    }
}

/// Closes every connection no worker is holding and returns how many were closed.
///
/// A connection whose I/O is still locked keeps a valid registration, so the
/// worker's own close path releases it and records the disconnect.
fn close_remaining(
    connections: &mut HashMap<Token, Arc<Connection>>,
    registry: &Registry,
    event_log: &dyn EventLog,
) -> usize {
    let mut closed = 0;
    for (_, conn) in connections.drain() {
        let Some(mut io) = conn.try_lock_io() else {
            warn!("{} is still held by a detached worker", conn.peer());
            continue;
        };
        if !conn.registration().cancel() {
            continue;
        }
        io.session.close();
        if let Some(mut stream) = io.stream.take() {
            if let Err(e) = registry.deregister(&mut stream) {
                debug!("deregistration of {} failed: {e}", conn.peer());
            }
            let _ = stream.shutdown(Shutdown::Both);
            drop(stream);
            closed += 1;
            event_log.record(&format!("Client disconnected: {}", conn.peer()));
        }
    }
    closed
}

// ── Tests ─────────────────────────────────────────────────────────────────────
