//! Protocol module containing the TCP session protocol and the UDP beacon format.

pub mod beacon;
pub mod frames;
pub mod session;

pub use beacon::{BeaconMessage, BeaconParseError};
pub use frames::{encode_line, LineBuffer};
pub use session::{Secret, Session, SessionOutcome, SessionState};
