//! Infrastructure layer for the server application.
//!
//! Contains OS-facing adapters: the TCP multiplexer, the UDP beacon tasks,
//! and file-system storage for configuration and the event log.
//!
//! **Dependency rule**: this layer may depend on `overseer_core`, but MUST
//! NOT import the `application` layer.

pub mod network;
pub mod storage;
