//! Application layer use cases for the client.
//!
//! - **`run_session`** – Drives one conversation: greeting, password loop,
//!   then the echo loop until the user types `exit`.

pub mod run_session;
