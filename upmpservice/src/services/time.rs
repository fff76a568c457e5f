//! Time service (spec.md §4.8): track time counters, refreshed on every
//! player event (including the facade's one-second elapsed-time poller).

use std::sync::Arc;

use crate::context::AppContext;
use crate::eventsink::EventSink;
use crate::servicebase::{ServiceBase, StateMap};

pub struct TimeService {
    base: ServiceBase,
    ctx: Arc<AppContext>,
}

impl TimeService {
    pub fn new(ctx: Arc<AppContext>, sink: Arc<dyn EventSink>) -> Self {
        TimeService {
            base: ServiceBase::new("Time", sink),
            ctx,
        }
    }

    pub async fn make_state(&self) -> StateMap {
        let status = self.ctx.facade.current().await.status().await;
        vec![
            ("TrackCount".to_string(), status.trackcounter.to_string()),
            ("Duration".to_string(), (status.total_ms / 1000).to_string()),
            ("Seconds".to_string(), (status.elapsed_ms / 1000).to_string()),
        ]
    }

    pub async fn refresh(&self) {
        let state = self.make_state().await;
        self.base.on_event(state).await;
    }
}
