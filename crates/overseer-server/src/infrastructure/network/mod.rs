//! Network infrastructure for the server application.
//!
//! # Sub-modules
//!
//! - **`event_loop`** – The single readiness-polling thread.  Owns the
//!   listener, the `mio::Poll` and the map of live connections; accepts new
//!   clients and hands readable ones to the dispatcher.
//!
//! - **`dispatcher`** – Fixed-size worker pool fed by a bounded queue.
//!   Guarantees at most one in-flight task per connection.
//!
//! - **`handler`** – One read/respond cycle for one connection: reads until
//!   the socket would block, feeds complete lines to the session, writes the
//!   replies, and tears the connection down when the session closes.
//!
//! - **`connection`** / **`registration`** – Per-connection state shared
//!   between the event loop and the workers.
//!
//! - **`beacon`** – UDP presence broadcaster and listener threads.

pub mod beacon;
pub mod connection;
pub mod dispatcher;
pub mod event_loop;
pub mod handler;
pub mod registration;
