//! Overseer client entry point.
//!
//! ```text
//! main()
//!  └─ SessionClient::connect_with_retry()
//!  └─ BeaconBroadcaster::start()   -- only with --beacon
//!  └─ run_session(stdin, stdout)
//!  └─ disconnect, stop beacon
//! ```

use std::io;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use overseer_client::application::run_session::run_session;
use overseer_client::infrastructure::network::SessionClient;
use overseer_client::infrastructure::tracing_log::TracingEventLog;
use overseer_core::ShutdownSignal;
use overseer_server::infrastructure::network::beacon::BeaconBroadcaster;

/// Interactive client for an overseer server.
#[derive(Debug, Parser)]
#[command(name = "overseer-client", version, about)]
struct Cli {
    /// Server host name or IP address.
    #[arg(long, default_value = "127.0.0.1", env = "OVERSEER_HOST")]
    host: String,

    /// Server TCP port.
    #[arg(long, default_value_t = 8080, env = "OVERSEER_PORT")]
    port: u16,

    /// Password to try first.  Prompted for on stdin when absent or rejected.
    #[arg(long, env = "OVERSEER_PASSWORD")]
    password: Option<String>,

    /// Milliseconds between connection attempts.
    #[arg(long, default_value_t = 2000)]
    retry_interval_ms: u64,

    /// Give up after this many connection attempts.  Retries forever when absent.
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Broadcast presence beacons while connected.
    #[arg(long)]
    beacon: bool,

    /// UDP port beacons are sent to.
    #[arg(long, default_value_t = 8888)]
    discovery_port: u16,

    /// Destination address for beacons.
    #[arg(long, default_value = "255.255.255.255")]
    broadcast_address: Ipv4Addr,

    /// Milliseconds between beacons.
    #[arg(long, default_value_t = 3000)]
    beacon_interval_ms: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let addr: SocketAddr = (cli.host.as_str(), cli.port)
        .to_socket_addrs()
        .with_context(|| format!("cannot resolve {}:{}", cli.host, cli.port))?
        .next()
        .with_context(|| format!("{} resolved to no addresses", cli.host))?;

    let mut client = SessionClient::connect_with_retry(
        addr,
        Duration::from_millis(cli.retry_interval_ms),
        cli.max_attempts,
    )?;
    println!("Connected to server {addr}");

    let beacon = if cli.beacon {
        let target = SocketAddr::new(cli.broadcast_address.into(), cli.discovery_port);
        Some(
            BeaconBroadcaster::start(
                target,
                cli.host.clone(),
                Duration::from_millis(cli.beacon_interval_ms),
                Arc::new(TracingEventLog),
                ShutdownSignal::new(),
            )
            .context("failed to start beacon broadcaster")?,
        )
    } else {
        None
    };

    let stdin = io::stdin();
    let summary = run_session(
        &mut client,
        &mut stdin.lock(),
        &mut io::stdout(),
        cli.password.as_deref(),
    )?;
    info!(
        "session over: authenticated={}, failed attempts={}, echoes={}",
        summary.authenticated,
        summary.failed_attempts,
        summary.echoes.len()
    );

    client.disconnect()?;
    if let Some(task) = beacon {
        task.stop();
    }
    println!("Disconnected.");
    Ok(())
}
