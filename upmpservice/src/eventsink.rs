//! The trait boundary standing in for the platform eventing/discovery
//! transport library (spec.md §1, §6): production code would implement
//! this against a real SSDP/GENA stack. This crate carries a log-only
//! implementation for the binary and an in-memory one for tests.

use async_trait::async_trait;
use std::sync::Mutex;
use tracing::info;

/// Notified with a service's changed (name, value) pairs whenever a
/// service's [`crate::servicebase::ServiceBase::on_event`] computes a
/// non-empty diff.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn notify(&self, service: &str, changes: &[(String, String)]);
}

/// Emits one `tracing` event per notification; used by the `upmpd` binary
/// until a real UPnP/OpenHome transport crate is wired in.
#[derive(Debug, Default)]
pub struct LogEventSink;

#[async_trait]
impl EventSink for LogEventSink {
    async fn notify(&self, service: &str, changes: &[(String, String)]) {
        info!(service, ?changes, "state event");
    }
}

/// Records every notification it receives, for test assertions.
#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All notifications received so far, oldest first.
    pub fn events(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.events.lock().unwrap().clone()
    }

    /// The most recent notification for `service`, if any.
    pub fn last_for(&self, service: &str) -> Option<Vec<(String, String)>> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(s, _)| s == service)
            .map(|(_, c)| c.clone())
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn notify(&self, service: &str, changes: &[(String, String)]) {
        self.events.lock().unwrap().push((service.to_string(), changes.to_vec()));
    }
}
