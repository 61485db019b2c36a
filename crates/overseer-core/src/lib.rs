//! # overseer-core
//!
//! Shared library for Overseer containing the line-oriented session protocol,
//! the UDP presence beacon format, and the cooperative shutdown signal.
//!
//! This crate is used by both the server and the client applications.
//! It opens no sockets and spawns no threads.
//!
//! # Architecture overview
//!
//! Overseer is a small TCP service: clients connect, prove they know a shared
//! secret, and are then echoed back every line they send.  Alongside the TCP
//! service, peers advertise their presence on the LAN with UDP beacons.
//!
//! - **`protocol::frames`** – The literal lines exchanged on the wire and the
//!   [`LineBuffer`] that splits an inbound byte stream into lines.
//!
//! - **`protocol::session`** – The per-connection [`Session`] state machine
//!   (`AwaitingPassword → Authenticated → Closed`).
//!
//! - **`protocol::beacon`** – The pipe-delimited [`BeaconMessage`] payload.
//!
//! - **`shutdown`** – [`ShutdownSignal`], the cancellation token every
//!   long-running loop observes.

pub mod protocol;
pub mod shutdown;

pub use protocol::beacon::{BeaconMessage, BeaconParseError, BEACON_TAG};
pub use protocol::frames::{encode_line, LineBuffer, LineTooLong};
pub use protocol::session::{Secret, Session, SessionOutcome, SessionState};
pub use shutdown::ShutdownSignal;
