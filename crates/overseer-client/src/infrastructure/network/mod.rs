//! Blocking TCP client for the overseer session protocol.
//!
//! The protocol is plain newline-terminated text, so a `BufReader` over a
//! `std::net::TcpStream` is all the client needs.  [`SessionClient`] wraps
//! the stream with the handful of operations the application layer uses:
//!
//! ```text
//! connect_with_retry()  -- retries until the server is up
//! read_greeting()       -- greeting line + REQUEST_PASSWORD
//! authenticate()        -- one password attempt -> AuthReply
//! send_line() / read_line()
//! disconnect()
//! ```

use std::io::{self, BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use overseer_core::protocol::frames::{FAILED, PASSED, REQUEST_PASSWORD};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur in the client network layer.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Every connection attempt failed.
    #[error("failed to connect to {addr} after {attempts} attempts: {source}")]
    ConnectFailed {
        addr: SocketAddr,
        attempts: u32,
        #[source]
        source: io::Error,
    },
    /// An I/O error occurred on the established connection.
    #[error("connection I/O error: {0}")]
    Io(#[from] io::Error),
    /// The server closed the connection while a reply was expected.
    #[error("connection closed by server")]
    Closed,
}

/// Server verdict on one password attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthReply {
    Passed,
    Failed,
    /// Anything else, normalised to upper case.
    Unknown(String),
}

impl AuthReply {
    /// Classifies a reply line.  Surrounding whitespace and case are ignored.
    pub fn classify(line: &str) -> Self {
        let normalised = line.trim().to_uppercase();
        match normalised.as_str() {
            PASSED => Self::Passed,
            FAILED => Self::Failed,
            _ => Self::Unknown(normalised),
        }
    }
}

/// The two lines a server sends right after accepting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub text: String,
    /// Whether the second line was `REQUEST_PASSWORD`.
    pub password_requested: bool,
}

pub struct SessionClient {
    peer: SocketAddr,
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("peer", &self.peer)
            .finish()
    }
}

impl SessionClient {
    /// Connects once.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectFailed`] if the connection is refused.
    pub fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        Self::connect_with_retry(addr, Duration::ZERO, Some(1))
    }

    /// Connects to `addr`, waiting `retry_interval` between failed attempts.
    ///
    /// `max_attempts` of `None` retries forever.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectFailed`] with the last OS error once
    /// `max_attempts` is exhausted.
    pub fn connect_with_retry(
        addr: SocketAddr,
        retry_interval: Duration,
        max_attempts: Option<u32>,
    ) -> Result<Self, ClientError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match TcpStream::connect(addr) {
                Ok(stream) => {
                    info!("connected to {addr}");
                    return Self::from_stream(stream).map_err(ClientError::Io);
                }
                Err(source) => {
                    warn!("connection to {addr} failed ({attempts}): {source}");
                    if max_attempts.is_some_and(|max| attempts >= max) {
                        return Err(ClientError::ConnectFailed {
                            addr,
                            attempts,
                            source,
                        });
                    }
                    std::thread::sleep(retry_interval);
                }
            }
        }
    }

    fn from_stream(stream: TcpStream) -> io::Result<Self> {
        let peer = stream.peer_addr()?;
        let writer = stream.try_clone()?;
        Ok(Self {
            peer,
            reader: BufReader::new(stream),
            writer,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Bounds every subsequent read.  `None` blocks indefinitely.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), ClientError> {
        self.writer.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Sends `line` followed by a newline.
    pub fn send_line(&mut self, line: &str) -> Result<(), ClientError> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        debug!("sent {} bytes", line.len() + 1);
        Ok(())
    }

    /// Reads the next line without its terminator.  `None` at end-of-stream.
    pub fn read_line(&mut self) -> Result<Option<String>, ClientError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(Some(line))
    }

    /// Reads the greeting and the password request that follows it.
    pub fn read_greeting(&mut self) -> Result<Greeting, ClientError> {
        let text = self.read_line()?.ok_or(ClientError::Closed)?;
        let request = self.read_line()?.ok_or(ClientError::Closed)?;
        Ok(Greeting {
            text,
            password_requested: request == REQUEST_PASSWORD,
        })
    }

    /// Sends one password attempt and reads the verdict.
    pub fn authenticate(&mut self, password: &str) -> Result<AuthReply, ClientError> {
        self.send_line(password)?;
        let reply = self.read_line()?.ok_or(ClientError::Closed)?;
        Ok(AuthReply::classify(&reply))
    }

    /// Closes both directions of the connection.
    pub fn disconnect(self) -> Result<(), ClientError> {
        match self.writer.shutdown(Shutdown::Both) {
            Ok(()) => {}
            // Already closed by the server.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
            Err(e) => return Err(e.into()),
        }
        info!("disconnected from {}", self.peer);
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
