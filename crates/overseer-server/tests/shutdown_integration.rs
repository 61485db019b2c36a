//! Verifies that shutdown releases every socket the server opened.
//!
//! This file holds a single test on purpose: it counts the process's open
//! file descriptors through `/proc/self/fd`, and any other test running in
//! the same binary would disturb the count.

#![cfg(target_os = "linux")]

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use overseer_server::application::supervisor::Supervisor;
use overseer_server::infrastructure::storage::config::AppConfig;
use overseer_server::infrastructure::storage::event_log::MemoryEventLog;

fn open_fds() -> usize {
    std::fs::read_dir("/proc/self/fd")
        .expect("procfs must be mounted")
        .count()
}

fn read_line(reader: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read");
    line
}

#[test]
fn test_shutdown_leaves_no_open_descriptors() {
    // Arrange
    let mut config = AppConfig::default();
    config.server.bind_address = "127.0.0.1".to_string();
    config.server.server_port = 0;
    config.workers.worker_pool_size = 3;
    config.workers.drain_timeout_ms = 2000;
    config.discovery.enabled = true;
    config.discovery.listen = true;
    config.discovery.discovery_port = 0;
    config.discovery.broadcast_address = "127.0.0.1".to_string();
    config.discovery.beacon_interval_ms = 50;
    config.discovery.origin_address = Some("127.0.0.1".to_string());
    let log = Arc::new(MemoryEventLog::new());

    open_fds();
    let baseline = open_fds();

    let supervisor = Supervisor::start(config, log.clone()).expect("start");
    let stream = TcpStream::connect(supervisor.local_addr()).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut client = BufReader::new(stream);
    assert_eq!(read_line(&mut client), "Hello, client!\n");
    assert_eq!(read_line(&mut client), "REQUEST_PASSWORD\n");
    client.get_mut().write_all(b"admin123\n").unwrap();
    assert_eq!(read_line(&mut client), "PASSED\n");
    read_line(&mut client);

    let deadline = Instant::now() + Duration::from_secs(3);
    while !log.contains("Beacon received") && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(open_fds() > baseline);

    // Act
    let report = supervisor.shutdown().expect("shutdown");

    // Assert
    assert!(report.drained);
    assert_eq!(report.closed_connections, 1);
    assert_eq!(read_line(&mut client), "", "open session must be closed");
    drop(client);
    assert_eq!(open_fds(), baseline);
    assert!(log.contains("Beacon received"));
    assert_eq!(log.entries().last().map(String::as_str), Some("Server has shut down"));
}
