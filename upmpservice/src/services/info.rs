//! Info service (spec.md §4.7): duration, sample rate, bit depth, codec,
//! current URI/metadata, derived lossless/codec from the resource mime.

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::context::AppContext;
use crate::eventsink::EventSink;
use crate::servicebase::{ServiceBase, StateMap};

/// Lossless/lossy table from `original_source`'s mimetype map (SPEC_FULL
/// §4.7 supplement). `None` for an unrecognized mime: the lossless flag is
/// simply omitted.
fn lossless(mime: &str) -> Option<bool> {
    match mime {
        "audio/flac" | "audio/x-flac" | "audio/wav" | "audio/x-wav" | "audio/aiff" => Some(true),
        "audio/mpeg" | "audio/aac" | "audio/ogg" | "audio/opus" => Some(false),
        _ => None,
    }
}

fn codec_name(mime: &str) -> String {
    mime.rsplit('/').next().unwrap_or(mime).to_ascii_uppercase()
}

/// Metadata/metatext pushed out-of-band by the radio service when its
/// channel is active (spec.md §4.9 "Dynamic metadata is routed to the info
/// service, not into the upnp radio-service's channel metadata").
#[derive(Clone, Default)]
struct Override {
    metadata: String,
    metatext: String,
}

pub struct InfoService {
    base: ServiceBase,
    ctx: Arc<AppContext>,
    radio_override: Mutex<Option<Override>>,
    /// `ohinfocollapse`-style config flag: when set, `Metadata` and
    /// `Metatext` collapse into one value (spec.md §4.7).
    collapse_metatext: bool,
}

impl InfoService {
    pub fn new(ctx: Arc<AppContext>, collapse_metatext: bool, sink: Arc<dyn EventSink>) -> Self {
        InfoService {
            base: ServiceBase::new("Info", sink),
            ctx,
            radio_override: Mutex::new(None),
            collapse_metatext,
        }
    }

    /// Called by the radio service on each dynamic-metadata refresh.
    pub async fn set_metadata(&self, metadata: String, metatext: String) {
        *self.radio_override.lock().await = Some(Override { metadata, metatext });
        self.refresh().await;
    }

    pub async fn clear_radio_override(&self) {
        *self.radio_override.lock().await = None;
        self.refresh().await;
    }

    pub async fn make_state(&self) -> StateMap {
        let status = self.ctx.facade.current().await.status().await;
        let mut state = vec![
            ("TrackCount".to_string(), status.trackcounter.to_string()),
            ("DetailsCount".to_string(), status.detailscounter.to_string()),
            ("Duration".to_string(), (status.total_ms / 1000).to_string()),
            ("BitRate".to_string(), status.kbit_rate.to_string()),
            ("BitDepth".to_string(), status.bit_depth.to_string()),
            ("SampleRate".to_string(), status.sample_rate.to_string()),
        ];

        if let Some(song) = &status.current_song {
            state.push(("Uri".to_string(), song.resource.uri.clone()));
            let mime = &song.resource.mime;
            if let Some(l) = lossless(mime) {
                state.push(("Lossless".to_string(), l.to_string()));
            }
            if !mime.is_empty() && mime != "audio/unknown" {
                state.push(("CodecName".to_string(), codec_name(mime)));
            }
        } else {
            state.push(("Uri".to_string(), String::new()));
        }

        let overridden = self.radio_override.lock().await.clone();
        match overridden {
            Some(o) if self.collapse_metatext => {
                state.push(("Metadata".to_string(), format!("{} - {}", o.metadata, o.metatext)));
                state.push(("MetatextCount".to_string(), "1".to_string()));
            }
            Some(o) => {
                state.push(("Metadata".to_string(), o.metadata));
                state.push(("Metatext".to_string(), o.metatext));
                state.push(("MetatextCount".to_string(), "1".to_string()));
            }
            None => {
                let metadata = status
                    .current_song
                    .as_ref()
                    .and_then(|s| s.to_didl_string().ok())
                    .unwrap_or_default();
                state.push(("Metadata".to_string(), metadata));
            }
        }
        state
    }

    pub async fn refresh(&self) {
        let state = self.make_state().await;
        self.base.on_event(state).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lossless_table_matches_known_mimes() {
        assert_eq!(lossless("audio/flac"), Some(true));
        assert_eq!(lossless("audio/mpeg"), Some(false));
        assert_eq!(lossless("audio/unknown"), None);
    }

    #[test]
    fn codec_name_from_mime() {
        assert_eq!(codec_name("audio/mpeg"), "MPEG");
        assert_eq!(codec_name("audio/flac"), "FLAC");
    }
}
