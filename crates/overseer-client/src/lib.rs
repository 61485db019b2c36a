//! overseer-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! The client connects to an overseer server, answers the password prompt,
//! and then relays lines typed by the user, printing each echo.

/// Application layer: the interactive session.
pub mod application;

/// Infrastructure layer: the TCP session client and the beacon log sink.
pub mod infrastructure;
