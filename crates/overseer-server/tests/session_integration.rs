//! End-to-end tests of the TCP session protocol against a running server.
//!
//! # Purpose
//!
//! These tests start a real [`Supervisor`] on `127.0.0.1` with an OS-assigned
//! port and talk to it over plain blocking `std::net::TcpStream`s, exactly
//! like a terminal client would.  They verify:
//!
//! - The full scripted conversation: greeting, `REQUEST_PASSWORD`, a wrong
//!   password, the right one, an echo, and `exit`.
//! - That many clients at once keep fully independent sessions.
//! - That closing is exactly-once: one `Client disconnected` entry per
//!   connection no matter how the close was triggered.
//!
//! Beacons are disabled so nothing else touches the event log.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use overseer_server::application::supervisor::Supervisor;
use overseer_server::infrastructure::storage::config::AppConfig;
use overseer_server::infrastructure::storage::event_log::MemoryEventLog;

// ── Helpers ───────────────────────────────────────────────────────────────────

fn start_server() -> (Supervisor, Arc<MemoryEventLog>) {
    let mut config = AppConfig::default();
    config.server.bind_address = "127.0.0.1".to_string();
    config.server.server_port = 0;
    config.workers.worker_pool_size = 4;
    config.workers.drain_timeout_ms = 2000;
    config.discovery.enabled = false;

    let log = Arc::new(MemoryEventLog::new());
    let supervisor = Supervisor::start(config, log.clone()).expect("server must start");
    (supervisor, log)
}

struct Client {
    reader: BufReader<TcpStream>,
}

impl Client {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        Self {
            reader: BufReader::new(stream),
        }
    }

    fn send(&mut self, line: &str) {
        self.reader
            .get_mut()
            .write_all(format!("{line}\n").as_bytes())
            .expect("send");
    }

    /// Next line without its terminator, or `None` at end-of-stream.
    fn recv(&mut self) -> Option<String> {
        let mut line = String::new();
        match self.reader.read_line(&mut line).expect("recv") {
            0 => None,
            _ => Some(line.trim_end_matches('\n').to_string()),
        }
    }

    fn expect(&mut self, expected: &str) {
        assert_eq!(self.recv().as_deref(), Some(expected));
    }

    fn authenticate(&mut self) {
        self.expect("Hello, client!");
        self.expect("REQUEST_PASSWORD");
        self.send("admin123");
        self.expect("PASSED");
        self.expect("Welcome! You are now authenticated.");
    }
}

fn wait_for(log: &MemoryEventLog, needle: &str, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while log.count(needle) < count && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
}

// ── Scenario ──────────────────────────────────────────────────────────────────

#[test]
fn test_scripted_conversation_from_greeting_to_exit() {
    // Arrange
    let (server, log) = start_server();
    let mut client = Client::connect(server.local_addr());

    // Act / Assert
    client.expect("Hello, client!");
    client.expect("REQUEST_PASSWORD");
    client.send("wrong");
    client.expect("FAILED");
    client.send("admin123");
    client.expect("PASSED");
    client.expect("Welcome! You are now authenticated.");
    client.send("ping");
    client.expect("Echo: ping");
    client.send("exit");
    assert_eq!(client.recv(), None, "server must close after exit");

    wait_for(&log, "Client disconnected", 1);
    server.shutdown().expect("shutdown");
    assert_eq!(log.count("Wrong password attempt"), 1);
    assert_eq!(log.count("Password accepted"), 1);
    assert_eq!(log.count("Client disconnected"), 1);
}

#[test]
fn test_repeated_wrong_passwords_are_never_locked_out() {
    let (server, _log) = start_server();
    let mut client = Client::connect(server.local_addr());
    client.expect("Hello, client!");
    client.expect("REQUEST_PASSWORD");

    for attempt in 0..25 {
        client.send(&format!("guess-{attempt}"));
        client.expect("FAILED");
    }
    client.send("admin123");
    client.expect("PASSED");

    server.shutdown().expect("shutdown");
}

#[test]
fn test_exit_is_case_insensitive_and_sends_nothing() {
    let (server, _log) = start_server();
    let mut client = Client::connect(server.local_addr());
    client.authenticate();

    client.send("ExIt");

    assert_eq!(client.recv(), None);
    server.shutdown().expect("shutdown");
}

#[test]
fn test_exit_before_authentication_is_just_a_wrong_password() {
    let (server, _log) = start_server();
    let mut client = Client::connect(server.local_addr());
    client.expect("Hello, client!");
    client.expect("REQUEST_PASSWORD");

    client.send("exit");

    client.expect("FAILED");
    server.shutdown().expect("shutdown");
}

#[test]
fn test_pipelined_lines_are_answered_in_order() {
    let (server, _log) = start_server();
    let mut client = Client::connect(server.local_addr());
    client.expect("Hello, client!");
    client.expect("REQUEST_PASSWORD");

    client
        .reader
        .get_mut()
        .write_all(b"admin123\r\none\ntwo\nthree\n")
        .unwrap();

    client.expect("PASSED");
    client.expect("Welcome! You are now authenticated.");
    client.expect("Echo: one");
    client.expect("Echo: two");
    client.expect("Echo: three");
    server.shutdown().expect("shutdown");
}

#[test]
fn test_abrupt_disconnect_is_logged_once() {
    // Arrange
    let (server, log) = start_server();
    let mut client = Client::connect(server.local_addr());
    client.authenticate();

    // Act
    drop(client);
    wait_for(&log, "Client disconnected", 1);

    // Assert
    let report = server.shutdown().expect("shutdown");
    assert_eq!(report.closed_connections, 0);
    assert_eq!(log.count("Client disconnected"), 1);
}

// ── Concurrency ───────────────────────────────────────────────────────────────

#[test]
fn test_concurrent_clients_keep_independent_sessions() {
    // Arrange
    let (server, log) = start_server();
    let addr = server.local_addr();
    const CLIENTS: usize = 16;

    // Act: half the clients authenticate, half keep failing, all interleaved.
    let handles: Vec<_> = (0..CLIENTS)
        .map(|id| {
            std::thread::spawn(move || {
                let mut client = Client::connect(addr);
                client.expect("Hello, client!");
                client.expect("REQUEST_PASSWORD");
                if id % 2 == 0 {
                    client.send("admin123");
                    client.expect("PASSED");
                    client.expect("Welcome! You are now authenticated.");
                    for round in 0..20 {
                        let msg = format!("client {id} round {round}");
                        client.send(&msg);
                        client.expect(&format!("Echo: {msg}"));
                    }
                    client.send("exit");
                    assert_eq!(client.recv(), None);
                    None
                } else {
                    for round in 0..20 {
                        client.send(&format!("bad {id} {round}"));
                        client.expect("FAILED");
                    }
                    // Still connected: the server closes it at shutdown.
                    Some(client)
                }
            })
        })
        .collect();
    let still_open: Vec<Client> = handles
        .into_iter()
        .filter_map(|h| h.join().expect("client thread"))
        .collect();

    // Assert
    wait_for(&log, "Client disconnected", CLIENTS / 2);
    let report = server.shutdown().expect("shutdown");
    assert_eq!(report.closed_connections, CLIENTS / 2);
    assert_eq!(log.count("Client connected"), CLIENTS);
    assert_eq!(log.count("Client disconnected"), CLIENTS);
    drop(still_open);
}
