//! Event sink for the client's beacon broadcaster.
//!
//! The client has no audit file; beacon events go to the console log.

use overseer_server::infrastructure::storage::event_log::EventLog;

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventLog;

impl EventLog for TracingEventLog {
    fn record(&self, message: &str) {
        tracing::info!("{message}");
    }
}
