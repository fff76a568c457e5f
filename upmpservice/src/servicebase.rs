//! The common event/service mechanism (spec.md §4.3): every service
//! composes one of these rather than inheriting from a base class (see
//! spec.md §9 "Deep inheritance / dynamic dispatch").

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::eventsink::EventSink;

/// An ordered (name, value) state map, never re-sorted: insertion order is
/// preserved end to end because the transport-compat `LastChange`
/// rendering depends on it (spec.md §9 Open Question (a)).
pub type StateMap = Vec<(String, String)>;

/// Owns one service's previous-state snapshot and the diff/emit logic
/// (spec.md §4.3): `make_state` is supplied by the call site (each
/// service implements its own), `on_event` does the rest.
pub struct ServiceBase {
    service_name: &'static str,
    sink: Arc<dyn EventSink>,
    previous: Mutex<StateMap>,
}

impl ServiceBase {
    pub fn new(service_name: &'static str, sink: Arc<dyn EventSink>) -> Self {
        ServiceBase {
            service_name,
            sink,
            previous: Mutex::new(Vec::new()),
        }
    }

    /// Diff `state` against the last-emitted snapshot and, if anything
    /// changed, notify the sink with exactly the changed pairs (Testable
    /// property 4). Replaces the previous-state snapshot unconditionally,
    /// even when nothing changed.
    pub async fn on_event(&self, state: StateMap) {
        let mut previous = self.previous.lock().await;
        let changed = diff(&previous, &state);
        if !changed.is_empty() {
            self.sink.notify(self.service_name, &changed).await;
        }
        *previous = state;
    }

    /// `all = true`: the full current state (for initial subscription
    /// sync). `all = false`: the diff against whatever was last emitted,
    /// without updating the previous-state snapshot (a pure read).
    pub async fn get_event_data(&self, state: &StateMap, all: bool) -> StateMap {
        if all {
            state.clone()
        } else {
            let previous = self.previous.lock().await;
            diff(&previous, state)
        }
    }

    /// Diff `state` against the previous snapshot and replace it, without
    /// notifying the sink. For services (transport-compat) that bundle
    /// their own diff into a single eventable variable instead of emitting
    /// raw (name, value) pairs directly.
    pub async fn diff_and_store(&self, state: StateMap) -> StateMap {
        let mut previous = self.previous.lock().await;
        let changed = diff(&previous, &state);
        *previous = state;
        changed
    }

    /// Notify the sink with an already-computed change list, bypassing
    /// `on_event`'s own diffing.
    pub async fn notify(&self, changes: &[(String, String)]) {
        if !changes.is_empty() {
            self.sink.notify(self.service_name, changes).await;
        }
    }
}

fn diff(previous: &StateMap, current: &StateMap) -> StateMap {
    current
        .iter()
        .filter(|(k, v)| previous.iter().find(|(pk, _)| pk == k).map(|(_, pv)| pv != v).unwrap_or(true))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventsink::MemoryEventSink;

    #[tokio::test]
    async fn emits_only_changed_pairs() {
        let sink = Arc::new(MemoryEventSink::new());
        let base = ServiceBase::new("TestService", sink.clone());

        base.on_event(vec![("A".into(), "1".into()), ("B".into(), "2".into())]).await;
        assert_eq!(
            sink.last_for("TestService").unwrap(),
            vec![("A".to_string(), "1".to_string()), ("B".to_string(), "2".to_string())]
        );

        base.on_event(vec![("A".into(), "1".into()), ("B".into(), "3".into())]).await;
        assert_eq!(sink.last_for("TestService").unwrap(), vec![("B".to_string(), "3".to_string())]);
    }

    #[tokio::test]
    async fn no_event_on_unchanged_state() {
        let sink = Arc::new(MemoryEventSink::new());
        let base = ServiceBase::new("TestService", sink.clone());
        base.on_event(vec![("A".into(), "1".into())]).await;
        let count_before = sink.events().len();
        base.on_event(vec![("A".into(), "1".into())]).await;
        assert_eq!(sink.events().len(), count_before);
    }
}
