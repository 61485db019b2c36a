//! Overseer server entry point.
//!
//! ```text
//! main()
//!  └─ load_or_create()        -- config/settings.toml, defaults on first run
//!  └─ Supervisor::start()     -- TCP event loop, workers, beacon threads
//!  └─ wait for Ctrl-C
//!  └─ Supervisor::shutdown()  -- on a blocking thread
//! ```
//!
//! The Tokio runtime is only used to wait for the signal.  All socket work
//! happens on the supervisor's own threads.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use overseer_server::application::supervisor::Supervisor;
use overseer_server::infrastructure::storage::config::{load_or_create, DEFAULT_CONFIG_PATH};
use overseer_server::infrastructure::storage::event_log::{EventLog, FileEventLog};

/// Password-gated multiplexed echo server with UDP presence beacons.
#[derive(Debug, Parser)]
#[command(name = "overseer-server", version, about)]
struct Cli {
    /// Settings file; created with defaults if it does not exist.
    #[arg(long, env = "OVERSEER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// TCP port override.
    #[arg(long, env = "OVERSEER_PORT")]
    port: Option<u16>,

    /// UDP discovery port override.
    #[arg(long)]
    discovery_port: Option<u16>,

    /// Run without the beacon broadcaster and listener.
    #[arg(long)]
    no_beacon: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_or_create(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if let Some(port) = cli.port {
        config.server.server_port = port;
    }
    if let Some(port) = cli.discovery_port {
        config.discovery.discovery_port = port;
    }
    if cli.no_beacon {
        config.discovery.enabled = false;
    }

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();

    info!(
        "{} starting (config {})",
        config.server.server_name,
        cli.config.display()
    );

    let event_log: Arc<dyn EventLog> = Arc::new(FileEventLog::new(config.logging.log_file.clone()));
    let supervisor =
        Supervisor::start(config, event_log).context("server failed to start")?;

    info!(
        "ready on {}.  Press Ctrl-C to exit.",
        supervisor.local_addr()
    );
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutdown signal received");

    let report = tokio::task::spawn_blocking(move || supervisor.shutdown())
        .await
        .context("shutdown task failed")??;
    info!(
        "stopped: closed {} connections, workers drained: {}",
        report.closed_connections, report.drained
    );
    Ok(())
}
