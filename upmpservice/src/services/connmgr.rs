//! Connection-manager service (spec.md §2 item 5): advertises the sink
//! formats we accept, so a control point's `setAVTransportURI` format
//! check (spec.md §4.5) has something to validate against.

use std::sync::Arc;
use upmpdidl::ProtocolInfo;

use crate::eventsink::EventSink;
use crate::servicebase::{ServiceBase, StateMap};

/// The formats `upmpdcli` advertises regardless of what MPD's own output
/// plugins actually support: MPD transcodes internally, the advertised
/// list is what control points are allowed to *send* us.
pub fn default_sink_formats() -> Vec<ProtocolInfo> {
    ["audio/mpeg", "audio/flac", "audio/x-flac", "audio/ogg", "audio/opus", "audio/aac", "audio/wav", "audio/x-wav", "audio/aiff"]
        .into_iter()
        .map(ProtocolInfo::http_get)
        .collect()
}

pub struct ConnectionManagerService {
    base: ServiceBase,
    sink_formats: Vec<ProtocolInfo>,
}

impl ConnectionManagerService {
    pub fn new(sink_formats: Vec<ProtocolInfo>, sink: Arc<dyn EventSink>) -> Self {
        ConnectionManagerService {
            base: ServiceBase::new("ConnectionManager", sink),
            sink_formats,
        }
    }

    pub fn sink_protocol_info(&self) -> String {
        self.sink_formats.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
    }

    /// Whether `offered`, parsed from an incoming `res@protocolInfo`,
    /// matches one of our advertised sink formats.
    pub fn accepts(&self, offered: &str) -> bool {
        let Some(offered) = ProtocolInfo::parse(offered) else {
            return false;
        };
        self.sink_formats.iter().any(|f| f.accepts(&offered))
    }

    pub fn make_state(&self) -> StateMap {
        vec![
            ("SourceProtocolInfo".to_string(), String::new()),
            ("SinkProtocolInfo".to_string(), self.sink_protocol_info()),
            ("CurrentConnectionIDs".to_string(), "0".to_string()),
        ]
    }

    pub async fn refresh(&self) {
        let state = self.make_state();
        self.base.on_event(state).await;
    }

    pub fn get_current_connection_ids(&self) -> &'static str {
        "0"
    }

    pub fn get_current_connection_info(&self) -> (i32, i32, String, i32, String, &'static str, &'static str, &'static str) {
        (0, -1, String::new(), -1, String::new(), "Output", "Unknown", "0")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_advertised_mime() {
        let svc = ConnectionManagerService::new(default_sink_formats(), Arc::new(crate::eventsink::LogEventSink));
        assert!(svc.accepts("http-get:*:audio/mpeg:*"));
        assert!(!svc.accepts("http-get:*:video/mp4:*"));
    }
}
