//! Application layer for the server.
//!
//! # Sub-modules
//!
//! - **`supervisor`** – Starts the event loop and beacon tasks from an
//!   [`AppConfig`](crate::infrastructure::storage::config::AppConfig), and
//!   runs the ordered shutdown that stops them again.

pub mod supervisor;
