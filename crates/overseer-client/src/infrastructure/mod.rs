//! Infrastructure for the client application.
//!
//! - **`network`** – Blocking line-oriented TCP client for the session protocol.
//! - **`tracing_log`** – Event sink that forwards beacon events to `tracing`.

pub mod network;
pub mod tracing_log;
