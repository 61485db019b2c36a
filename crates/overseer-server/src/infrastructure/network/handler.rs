//! ConnectionHandler: one read/respond cycle for one connection.
//!
//! The handler runs on a worker thread.  Each invocation:
//!
//! 1. Skips stale work: a cancelled registration or a closed session means
//!    another run already tore the connection down.
//! 2. Writes the greeting and `REQUEST_PASSWORD` on the very first run.
//! 3. Reads until the socket reports `WouldBlock`, feeding every complete
//!    line to the [`Session`](overseer_core::Session) and writing the replies
//!    as it goes.  After [`READ_BUDGET`] bytes the run stops early and asks
//!    the event loop to resubmit the connection, so one busy client cannot
//!    hold a worker indefinitely.
//! 4. On `Closed` (client `exit`, end-of-stream, I/O fault, oversized line)
//!    cancels the registration, shuts the socket down and hands it back to the
//!    event loop, which deregisters and drops it.  This happens exactly once
//!    per connection no matter how many stale events arrive afterwards.
//!
//! A read of zero bytes is end-of-stream.  "No data right now" surfaces as
//! `WouldBlock` instead and simply ends the cycle.

use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::net::TcpStream;
use overseer_core::protocol::frames::REQUEST_PASSWORD;
use overseer_core::{encode_line, Secret, Session, SessionOutcome, SessionState};
use tracing::{debug, info, warn};

use super::connection::{Connection, ConnectionIo};
use super::event_loop::LoopHandle;
use crate::infrastructure::storage::event_log::EventLog;

/// Bytes read from the socket per `read` call.
const READ_CHUNK: usize = 1024;

/// Bytes one run may consume before yielding its worker.
pub const READ_BUDGET: usize = 64 * 1024;

/// Pause between write attempts while the socket's send buffer is full.
const WRITE_BACKOFF: Duration = Duration::from_millis(2);

/// Protocol settings every connection shares.
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    pub secret: Secret,
    pub greeting: String,
    pub welcome: String,
    /// How long a single reply may wait on a full send buffer.
    pub write_timeout: Duration,
}

/// Why a connection was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The authenticated client sent `exit`.
    ClientExit,
    /// The peer closed its side of the stream.
    EndOfStream,
    /// A read or write failed.
    IoError,
    /// The peer sent an unterminated line over the buffer limit.
    LineTooLong,
}

/// Executes read/respond cycles on behalf of the dispatcher.
pub struct ConnectionHandler {
    settings: HandlerSettings,
    event_log: Arc<dyn EventLog>,
    loop_handle: LoopHandle,
}

impl ConnectionHandler {
    pub fn new(
        settings: HandlerSettings,
        event_log: Arc<dyn EventLog>,
        loop_handle: LoopHandle,
    ) -> Self {
        Self {
            settings,
            event_log,
            loop_handle,
        }
    }

    /// Creates the session for a freshly accepted connection.
    pub fn new_session(&self) -> Session {
        Session::with_welcome(self.settings.welcome.clone())
    }

    pub fn event_log(&self) -> &Arc<dyn EventLog> {
        &self.event_log
    }

    /// Runs one cycle for `conn`.  Never panics on I/O faults.
    pub fn handle(&self, conn: &Connection) {
        if !conn.registration().is_valid() {
            debug!("skipping stale task for {}", conn.peer());
            return;
        }
        let mut io = conn.lock_io();
        if io.session.is_closed() || io.stream.is_none() {
            return;
        }

        match self.run_cycle(conn, &mut io) {
            Ok(None) => {}
            Ok(Some(reason)) => self.close(conn, &mut io, reason),
            Err(e) => {
                warn!("connection error with {}: {e}", conn.peer());
                self.close(conn, &mut io, CloseReason::IoError);
            }
        }
    }

    /// Returns `Some(reason)` when the connection must close.
    fn run_cycle(&self, conn: &Connection, io: &mut ConnectionIo) -> io::Result<Option<CloseReason>> {
        let ConnectionIo {
            stream,
            inbound,
            session,
            greeted,
        } = io;
        let Some(stream) = stream.as_mut() else {
            return Ok(Some(CloseReason::EndOfStream));
        };

        if !*greeted {
            let mut frame = encode_line(&self.settings.greeting);
            frame.extend(encode_line(REQUEST_PASSWORD));
            self.write_frame(stream, &frame)?;
            *greeted = true;
        }

        let mut chunk = [0u8; READ_CHUNK];
        let mut consumed = 0;
        loop {
            if consumed >= READ_BUDGET {
                debug!("read budget spent on {}; yielding", conn.peer());
                self.loop_handle.resubmit(conn.token());
                return Ok(None);
            }
            let n = match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            consumed += n;
            let overflow = inbound.push(&chunk[..n]);
            while let Some(line) = inbound.next_line() {
                if let Some(reason) = self.apply_line(conn, session, stream, &line)? {
                    return Ok(Some(reason));
                }
            }
            if let Err(e) = overflow {
                warn!("closing {}: {e}", conn.peer());
                return Ok(Some(CloseReason::LineTooLong));
            }
        }

        // End-of-stream: a trailing line without a newline still counts.
        if let Some(line) = inbound.take_remainder() {
            if let Some(reason) = self.apply_line(conn, session, stream, &line)? {
                return Ok(Some(reason));
            }
        }
        Ok(Some(CloseReason::EndOfStream))
    }

    fn apply_line(
        &self,
        conn: &Connection,
        session: &mut Session,
        stream: &mut TcpStream,
        line: &str,
    ) -> io::Result<Option<CloseReason>> {
        let before = session.state();
        match session.handle_line(line, &self.settings.secret) {
            SessionOutcome::Respond(lines) => {
                if before == SessionState::AwaitingPassword {
                    if session.state() == SessionState::Authenticated {
                        info!("password accepted from {}", conn.peer());
                        self.event_log
                            .record(&format!("Password accepted from {}", conn.peer()));
                    } else {
                        info!(
                            "wrong password attempt {} from {}",
                            session.failed_attempts(),
                            conn.peer()
                        );
                        self.event_log
                            .record(&format!("Wrong password attempt from {}", conn.peer()));
                    }
                } else {
                    debug!("echoing {} bytes to {}", line.len(), conn.peer());
                }
                let frame: Vec<u8> = lines.iter().flat_map(|l| encode_line(l)).collect();
                self.write_frame(stream, &frame)?;
                Ok(None)
            }
            SessionOutcome::Close => {
                self.event_log
                    .record(&format!("Client session ended: {}", conn.peer()));
                Ok(Some(CloseReason::ClientExit))
            }
            SessionOutcome::Ignored => Ok(None),
        }
    }

    /// Writes all of `frame`, retrying on a full send buffer until the write deadline.
    fn write_frame(&self, stream: &mut TcpStream, frame: &[u8]) -> io::Result<()> {
        let deadline = Instant::now() + self.settings.write_timeout;
        let mut written = 0;
        while written < frame.len() {
            match stream.write(&frame[written..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "socket accepted zero bytes",
                    ))
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "send buffer stayed full past the write deadline",
                        ));
                    }
                    std::thread::sleep(WRITE_BACKOFF);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Tears the connection down exactly once.
    fn close(&self, conn: &Connection, io: &mut ConnectionIo, reason: CloseReason) {
        let authenticated = io.session.state() == SessionState::Authenticated;
        io.session.close();
        if !conn.registration().cancel() {
            return;
        }
        if reason == CloseReason::EndOfStream && authenticated {
            self.event_log
                .record(&format!("Client session ended: {}", conn.peer()));
        }
        if let Some(stream) = io.stream.take() {
            // Shutdown lets the peer see EOF now; the loop closes the fd.
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                debug!("shutdown of {} failed: {e}", conn.peer());
            }
            self.loop_handle.deregister(conn.token(), stream);
        }
        info!("client disconnected: {} ({reason:?})", conn.peer());
        self.event_log
            .record(&format!("Client disconnected: {}", conn.peer()));
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
