//! UDP presence beacons.
//!
//! Two independent background threads share the discovery port:
//!
//! - [`BeaconBroadcaster`] sends `OVERSEER_BEACON|<origin>|online` to the
//!   configured broadcast address every interval.  A failed send is logged
//!   and the next tick tries again.
//! - [`BeaconListener`] receives datagrams on the discovery port and records
//!   the ones carrying the `OVERSEER_BEACON` prefix.  Anything else is dropped
//!   without a trace.
//!
//! # Stopping
//!
//! Both threads watch a [`ShutdownSignal`].  The broadcaster sleeps on the
//! signal itself, so it reacts at once.  The listener is parked in
//! `recv_from`; [`BeaconTask::stop`] sends it an empty datagram over loopback
//! to unblock it, and the 500 ms read timeout is the backstop should that
//! datagram be lost.  The socket closes when the thread exits.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use overseer_core::protocol::beacon::is_beacon;
use overseer_core::{BeaconMessage, ShutdownSignal};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::infrastructure::storage::event_log::EventLog;

const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Largest datagram the listener reads; longer ones are truncated by the OS.
const MAX_DATAGRAM: usize = 2048;

#[derive(Debug, Error)]
pub enum BeaconError {
    #[error("failed to bind beacon socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to configure beacon socket: {0}")]
    Socket(#[source] io::Error),
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },
}

/// A running beacon thread.  Dropping the task stops it.
#[derive(Debug)]
pub struct BeaconTask {
    name: &'static str,
    local_addr: SocketAddr,
    /// Where to send the wake-up datagram, for tasks blocked in `recv_from`.
    wake_addr: Option<SocketAddr>,
    shutdown: ShutdownSignal,
    thread: Option<JoinHandle<()>>,
}

impl BeaconTask {
    /// Address the task's socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Triggers the shutdown signal and waits for the thread to exit.
    ///
    /// The signal is shared, so every other task watching it stops too.
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.shutdown.trigger();
        if let Some(addr) = self.wake_addr {
            nudge(addr);
        }
        if thread.join().is_err() {
            error!("{} thread panicked", self.name);
        } else {
            debug!("{} stopped", self.name);
        }
    }
}

impl Drop for BeaconTask {
    fn drop(&mut self) {
        self.halt();
    }
}

/// Periodic presence sender.
pub struct BeaconBroadcaster;

impl BeaconBroadcaster {
    /// Binds an ephemeral broadcast-enabled socket and starts sending.
    ///
    /// The first beacon goes out immediately, then one per `interval`.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError`] if the socket cannot be bound or configured,
    /// or the thread cannot be spawned.
    pub fn start(
        target: SocketAddr,
        origin: impl Into<String>,
        interval: Duration,
        event_log: Arc<dyn EventLog>,
        shutdown: ShutdownSignal,
    ) -> Result<BeaconTask, BeaconError> {
        let bind_addr = SocketAddr::new(unspecified_like(target.ip()), 0);
        let socket = UdpSocket::bind(bind_addr).map_err(|source| BeaconError::BindFailed {
            addr: bind_addr,
            source,
        })?;
        socket.set_broadcast(true).map_err(BeaconError::Socket)?;
        let local_addr = socket.local_addr().map_err(BeaconError::Socket)?;

        let message = BeaconMessage::online(origin);
        info!("broadcasting `{message}` to {target} every {interval:?}");

        let name = "overseer-beacon-tx";
        let signal = shutdown.clone();
        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || broadcast_loop(socket, target, message, interval, event_log, signal))
            .map_err(|source| BeaconError::Spawn { name, source })?;

        Ok(BeaconTask {
            name,
            local_addr,
            wake_addr: None,
            shutdown,
            thread: Some(thread),
        })
    }
}

fn broadcast_loop(
    socket: UdpSocket,
    target: SocketAddr,
    message: BeaconMessage,
    interval: Duration,
    event_log: Arc<dyn EventLog>,
    shutdown: ShutdownSignal,
) {
    let payload = message.encode();
    loop {
        match socket.send_to(payload.as_bytes(), target) {
            Ok(_) => debug!("beacon sent to {target}"),
            Err(e) => {
                warn!("beacon send to {target} failed: {e}");
                event_log.record(&format!("ERROR in Beacon Broadcaster: {e}"));
            }
        }
        if shutdown.wait_timeout(interval) {
            break;
        }
    }
    info!("beacon broadcaster stopped");
}

/// Receiver that records presence beacons.
pub struct BeaconListener;

impl BeaconListener {
    /// Binds `bind_addr` and starts receiving.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::BindFailed`] if the discovery port is taken.
    pub fn start(
        bind_addr: SocketAddr,
        event_log: Arc<dyn EventLog>,
        shutdown: ShutdownSignal,
    ) -> Result<BeaconTask, BeaconError> {
        let socket = UdpSocket::bind(bind_addr).map_err(|source| BeaconError::BindFailed {
            addr: bind_addr,
            source,
        })?;
        socket
            .set_read_timeout(Some(READ_TIMEOUT))
            .map_err(BeaconError::Socket)?;
        let local_addr = socket.local_addr().map_err(BeaconError::Socket)?;

        let name = "overseer-beacon-rx";
        let signal = shutdown.clone();
        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || listen_loop(socket, event_log, signal))
            .map_err(|source| BeaconError::Spawn { name, source })?;

        info!("listening for beacons on UDP {local_addr}");
        Ok(BeaconTask {
            name,
            local_addr,
            wake_addr: Some(local_addr),
            shutdown,
            thread: Some(thread),
        })
    }
}

fn listen_loop(socket: UdpSocket, event_log: Arc<dyn EventLog>, shutdown: ShutdownSignal) {
    let mut buf = [0u8; MAX_DATAGRAM];
    while !shutdown.is_triggered() {
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(e) if is_timeout_error(&e) => continue,
            Err(e) => {
                if shutdown.is_triggered() {
                    break;
                }
                warn!("beacon receive failed: {e}");
                event_log.record(&format!("ERROR in Beacon Listener: {e}"));
                continue;
            }
        };
        if shutdown.is_triggered() {
            break;
        }
        record_beacon(&buf[..len], src, event_log.as_ref());
    }
    info!("beacon listener stopped");
}

/// Records `datagram` if it is a beacon.  Returns whether it was.
fn record_beacon(datagram: &[u8], src: SocketAddr, event_log: &dyn EventLog) -> bool {
    if !is_beacon(datagram) {
        return false;
    }
    let payload = String::from_utf8_lossy(datagram);
    match BeaconMessage::parse(&payload) {
        Ok(beacon) => info!(
            "beacon from {src}: {} is {}",
            beacon.origin_address(),
            beacon.status()
        ),
        Err(e) => debug!("unstructured beacon from {src}: {e}"),
    }
    event_log.record(&format!("Beacon received: {payload} from {}", src.ip()));
    true
}

/// Best guess at this host's LAN address, for the beacon origin field.
///
/// Connecting a UDP socket sends nothing; it only asks the OS which local
/// address would route to the destination.
pub fn local_identity() -> String {
    let probe = || -> io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9))?;
        Ok(socket.local_addr()?.ip())
    };
    match probe() {
        Ok(ip) if !ip.is_unspecified() => ip.to_string(),
        _ => Ipv4Addr::LOCALHOST.to_string(),
    }
}

/// Sends an empty datagram to a listener so a blocked `recv_from` returns.
fn nudge(addr: SocketAddr) {
    let target = if addr.ip().is_unspecified() {
        SocketAddr::new(loopback_like(addr.ip()), addr.port())
    } else {
        addr
    };
    let result = UdpSocket::bind(SocketAddr::new(unspecified_like(target.ip()), 0))
        .and_then(|socket| socket.send_to(&[], target));
    if let Err(e) = result {
        debug!("could not wake beacon listener at {target}: {e}");
    }
}

fn unspecified_like(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}

fn loopback_like(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
    }
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
fn is_timeout_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────
