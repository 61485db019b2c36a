//! Start-up and shutdown orchestration.
//!
//! ```text
//! Supervisor::start()
//!  ├─ EventLoop::bind()        -- TCP listener + worker pool
//!  ├─ BeaconListener::start()  -- UDP receive thread (optional)
//!  ├─ BeaconBroadcaster::start()  -- UDP send thread (optional)
//!  └─ spawn "overseer-event-loop"
//!
//! Supervisor::shutdown()
//!  ├─ trigger ShutdownSignal + wake the loop
//!  ├─ join the loop thread (it drains workers and closes connections)
//!  └─ stop the beacon tasks
//! ```
//!
//! Any bind failure aborts start-up.  Whatever was already started is torn
//! down again as the partially built pieces are dropped.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;

use overseer_core::{Secret, ShutdownSignal};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::infrastructure::network::beacon::{
    local_identity, BeaconBroadcaster, BeaconError, BeaconListener, BeaconTask,
};
use crate::infrastructure::network::event_loop::{
    EventLoop, LoopHandle, LoopSettings, NetworkError, ShutdownReport,
};
use crate::infrastructure::network::handler::HandlerSettings;
use crate::infrastructure::storage::config::{AppConfig, ConfigError};
use crate::infrastructure::storage::event_log::EventLog;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Beacon(#[from] BeaconError),
    #[error("failed to spawn event loop thread: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("event loop thread panicked")]
    EventLoopPanicked,
}

type LoopThread = JoinHandle<Result<ShutdownReport, NetworkError>>;

/// A running server.
pub struct Supervisor {
    local_addr: SocketAddr,
    shutdown: ShutdownSignal,
    loop_handle: LoopHandle,
    loop_thread: Option<LoopThread>,
    listener: Option<BeaconTask>,
    broadcaster: Option<BeaconTask>,
    event_log: Arc<dyn EventLog>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("local_addr", &self.local_addr)
            .field("running", &self.loop_thread.is_some())
            .field("listener", &self.listener)
            .field("broadcaster", &self.broadcaster)
            .finish()
    }
}

impl Supervisor {
    /// Binds every socket and starts every thread `config` asks for.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError`] if the configuration is invalid or any socket
    /// cannot be bound.
    pub fn start(config: AppConfig, event_log: Arc<dyn EventLog>) -> Result<Self, StartupError> {
        config.validate()?;
        event_log.record("Server starting up...");

        let shutdown = ShutdownSignal::new();
        let (event_loop, loop_handle) = EventLoop::bind(
            config.listen_addr()?,
            LoopSettings {
                workers: config.workers.worker_pool_size,
                queue_capacity: config.workers.queue_capacity,
                drain_timeout: config.drain_timeout(),
                poll_interval: config.poll_interval(),
            },
            HandlerSettings {
                secret: Secret::new(config.server.password.clone()),
                greeting: config.server.greeting.clone(),
                welcome: config.server.welcome.clone(),
                write_timeout: config.write_timeout(),
            },
            Arc::clone(&event_log),
            shutdown.clone(),
        )?;
        let local_addr = event_loop.local_addr();

        let discovery = &config.discovery;
        let listener = if discovery.enabled && discovery.listen {
            Some(BeaconListener::start(
                config.discovery_bind_addr(),
                Arc::clone(&event_log),
                shutdown.clone(),
            )?)
        } else {
            None
        };

        let broadcaster = if discovery.enabled {
            let mut target = config.broadcast_target()?;
            // Port 0 asks the OS for a port; advertise on the one we got.
            if target.port() == 0 {
                if let Some(listener) = &listener {
                    target.set_port(listener.local_addr().port());
                }
            }
            let origin = discovery
                .origin_address
                .clone()
                .unwrap_or_else(local_identity);
            Some(BeaconBroadcaster::start(
                target,
                origin,
                config.beacon_interval(),
                Arc::clone(&event_log),
                shutdown.clone(),
            )?)
        } else {
            None
        };

        let loop_thread = std::thread::Builder::new()
            .name("overseer-event-loop".to_string())
            .spawn(move || event_loop.run())
            .map_err(StartupError::Spawn)?;

        info!(
            "{} listening on {local_addr}",
            config.server.server_name
        );
        event_log.record(&format!(
            "Server started. Listening on port {}",
            local_addr.port()
        ));

        Ok(Self {
            local_addr,
            shutdown,
            loop_handle,
            loop_thread: Some(loop_thread),
            listener,
            broadcaster,
            event_log,
        })
    }

    /// Address the TCP listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address the beacon listener is bound to, if it runs.
    pub fn discovery_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(BeaconTask::local_addr)
    }

    /// Stops everything and waits for it to finish.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError`] if the event loop failed or panicked.
    /// The beacon tasks are stopped either way.
    pub fn shutdown(mut self) -> Result<ShutdownReport, SupervisorError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<ShutdownReport, SupervisorError> {
        info!("server shutting down");
        self.shutdown.trigger();
        if let Err(e) = self.loop_handle.wake() {
            warn!("failed to wake event loop: {e}");
        }

        let outcome = match self.loop_thread.take() {
            Some(thread) => match thread.join() {
                Ok(result) => result.map_err(SupervisorError::from),
                Err(_) => Err(SupervisorError::EventLoopPanicked),
            },
            None => Ok(ShutdownReport {
                closed_connections: 0,
                drained: true,
            }),
        };

        if let Some(task) = self.listener.take() {
            task.stop();
        }
        if let Some(task) = self.broadcaster.take() {
            task.stop();
        }

        match &outcome {
            Ok(report) => info!(
                "server stopped: closed {} connections, drained={}",
                report.closed_connections, report.drained
            ),
            Err(e) => error!("server stopped with error: {e}"),
        }
        self.event_log.record("Server has shut down");
        outcome
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if self.loop_thread.is_some() {
            let _ = self.stop();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::event_log::MemoryEventLog;

    fn loopback_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.server.bind_address = "127.0.0.1".to_string();
        config.server.server_port = 0;
        config.workers.worker_pool_size = 2;
        config.workers.drain_timeout_ms = 1000;
        config.discovery.enabled = false;
        config
    }

    #[test]
    fn test_start_and_shutdown_record_lifecycle_events() {
        // Arrange
        let log = Arc::new(MemoryEventLog::new());

        // Act
        let supervisor = Supervisor::start(loopback_config(), log.clone()).expect("start");
        assert_ne!(supervisor.local_addr().port(), 0);
        assert!(supervisor.discovery_addr().is_none());
        let report = supervisor.shutdown().expect("shutdown");

        // Assert
        assert_eq!(report.closed_connections, 0);
        assert!(report.drained);
        let entries = log.entries();
        assert_eq!(entries.first().map(String::as_str), Some("Server starting up..."));
        assert!(entries[1].starts_with("Server started. Listening on port "));
        assert_eq!(entries.last().map(String::as_str), Some("Server has shut down"));
    }

    #[test]
    fn test_invalid_config_aborts_startup() {
        let mut config = loopback_config();
        config.workers.worker_pool_size = 0;

        let result = Supervisor::start(config, Arc::new(MemoryEventLog::new()));

        assert!(matches!(result, Err(StartupError::Config(_))));
    }

    #[test]
    fn test_port_in_use_aborts_startup() {
        // Arrange
        let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = loopback_config();
        config.server.server_port = holder.local_addr().unwrap().port();

        // Act
        let result = Supervisor::start(config, Arc::new(MemoryEventLog::new()));

        // Assert
        assert!(matches!(
            result,
            Err(StartupError::Network(NetworkError::BindFailed { .. }))
        ));
    }

    #[test]
    fn test_discovery_tasks_start_and_see_own_beacons() {
        // Arrange
        let mut config = loopback_config();
        config.discovery.enabled = true;
        config.discovery.listen = true;
        config.discovery.discovery_port = 0;
        config.discovery.broadcast_address = "127.0.0.1".to_string();
        config.discovery.beacon_interval_ms = 50;
        config.discovery.origin_address = Some("10.9.8.7".to_string());
        let log = Arc::new(MemoryEventLog::new());

        // Act
        let supervisor = Supervisor::start(config, log.clone()).expect("start");
        assert!(supervisor.discovery_addr().is_some());
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(3);
        while !log.contains("Beacon received") && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        supervisor.shutdown().expect("shutdown");

        // Assert
        assert!(log.contains("Beacon received: OVERSEER_BEACON|10.9.8.7|online from 127.0.0.1"));
    }
}
