//! Transport-compat service (spec.md §4.5): the two-track compatibility
//! view (current + next), bundling every changed variable into a single
//! `LastChange` XML fragment on each event (the wire representation the
//! compatibility protocol requires).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use upmpdidl::{ProtocolInfo, SongDescriptor};
use upmpmpd::status::TransportState as MpdTransportState;

use crate::context::AppContext;
use crate::error::{Error, Result};
use crate::eventsink::EventSink;
use crate::servicebase::{ServiceBase, StateMap};
use crate::services::common::{fmt_hms, parse_hms};
use crate::services::connmgr::ConnectionManagerService;

/// The five MPD-expressible play modes plus the direct-single mode,
/// spec.md §4.5's exact mapping table (Testable property 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayMode {
    Normal,
    Shuffle,
    RepeatOne,
    RepeatAll,
    Random,
    Direct1,
}

impl PlayMode {
    pub fn to_mpd_flags(self) -> (bool, bool, bool) {
        // (repeat, random, single)
        match self {
            PlayMode::Normal => (false, false, false),
            PlayMode::Shuffle => (false, true, false),
            PlayMode::RepeatOne => (true, false, true),
            PlayMode::RepeatAll => (true, false, false),
            PlayMode::Random => (true, true, false),
            PlayMode::Direct1 => (false, false, true),
        }
    }

    /// Falls through to `NORMAL` for any triple not in the table (Testable
    /// property 5's "reverse mapping... falls through to NORMAL").
    pub fn from_mpd_flags(repeat: bool, random: bool, single: bool) -> PlayMode {
        match (repeat, random, single) {
            (false, false, false) => PlayMode::Normal,
            (false, true, false) => PlayMode::Shuffle,
            (true, false, true) => PlayMode::RepeatOne,
            (true, false, false) => PlayMode::RepeatAll,
            (true, true, false) => PlayMode::Random,
            (false, false, true) => PlayMode::Direct1,
            _ => PlayMode::Normal,
        }
    }

    pub fn parse(s: &str) -> Option<PlayMode> {
        match s {
            "NORMAL" => Some(PlayMode::Normal),
            "SHUFFLE" => Some(PlayMode::Shuffle),
            "REPEAT_ONE" => Some(PlayMode::RepeatOne),
            "REPEAT_ALL" => Some(PlayMode::RepeatAll),
            "RANDOM" => Some(PlayMode::Random),
            "DIRECT_1" => Some(PlayMode::Direct1),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlayMode::Normal => "NORMAL",
            PlayMode::Shuffle => "SHUFFLE",
            PlayMode::RepeatOne => "REPEAT_ONE",
            PlayMode::RepeatAll => "REPEAT_ALL",
            PlayMode::Random => "RANDOM",
            PlayMode::Direct1 => "DIRECT_1",
        }
    }
}

/// Render changed (name, value) pairs into the `LastChange` XML fragment,
/// attributes in the same order the pairs were inserted (spec.md §9 Open
/// Question (a): "preserve the current order").
pub fn render_last_change(changes: &[(String, String)]) -> String {
    let mut inner = String::new();
    for (name, value) in changes {
        inner.push('<');
        inner.push_str(name);
        inner.push_str(" val=\"");
        inner.push_str(&escape_attr(value));
        inner.push_str("\"/>");
    }
    format!(
        "<Event xmlns=\"urn:schemas-upnp-org:metadata-1-0/AVT/\"><InstanceID val=\"0\">{inner}</InstanceID></Event>"
    )
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[derive(Default, Clone)]
struct TrackState {
    current_uri: String,
    current_meta: String,
    next_uri: String,
    next_meta: String,
    /// Set whenever `current_meta` was synthesized from MPD's `currentsong`
    /// rather than supplied verbatim by a control point (spec.md §4.5
    /// "Metadata source priority").
    current_is_synthetic: bool,
}

/// Resolves a URI to cached DIDL metadata, satisfied by the playlist
/// service without a direct dependency cycle (spec.md §9 "services never
/// look up siblings directly").
#[async_trait::async_trait]
pub trait UriMetadataLookup: Send + Sync {
    async fn lookup(&self, uri: &str) -> Option<String>;
}

pub struct TransportCompatService {
    base: ServiceBase,
    ctx: Arc<AppContext>,
    connmgr: Arc<ConnectionManagerService>,
    check_content_format: bool,
    autoplay: bool,
    keep_consume: bool,
    track: Mutex<TrackState>,
    radio_active: AtomicBool,
}

impl TransportCompatService {
    pub fn new(
        ctx: Arc<AppContext>,
        connmgr: Arc<ConnectionManagerService>,
        check_content_format: bool,
        autoplay: bool,
        keep_consume: bool,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        TransportCompatService {
            base: ServiceBase::new("AVTransport", sink),
            ctx,
            connmgr,
            check_content_format,
            autoplay,
            keep_consume,
            track: Mutex::new(TrackState::default()),
            radio_active: AtomicBool::new(false),
        }
    }

    /// Flips when the radio service (de)activates (spec.md §4.9 "Radio
    /// mode is reflected to the transport-compat service via a shared
    /// flag").
    pub fn set_radio_active(&self, active: bool) {
        self.radio_active.store(active, Ordering::Relaxed);
    }

    fn synthesize_metadata(song: &Option<SongDescriptor>) -> String {
        song.as_ref().and_then(|s| s.to_didl_string().ok()).unwrap_or_default()
    }

    /// Called from the MPD facade's player-change subscription; updates
    /// the current/next view per the priority rules and emits a
    /// `LastChange` event for whatever changed.
    pub async fn refresh(&self, uri_lookup: Option<&(dyn UriMetadataLookup)>) {
        let status = self.ctx.facade.current().await.status().await;
        let mpd_uri = status.current_song.as_ref().map(|s| s.resource.uri.clone()).unwrap_or_default();

        let mut track = self.track.lock().await;
        if self.radio_active.load(Ordering::Relaxed) {
            track.current_uri = mpd_uri;
            track.current_meta = Self::synthesize_metadata(&status.current_song);
            track.current_is_synthetic = true;
        } else if track.current_is_synthetic {
            track.current_uri = mpd_uri;
            track.current_meta = Self::synthesize_metadata(&status.current_song);
        } else if !track.next_uri.is_empty() && mpd_uri == track.next_uri {
            track.current_uri = track.next_uri.clone();
            track.current_meta = track.next_meta.clone();
        } else if mpd_uri != track.current_uri {
            let looked_up = match uri_lookup {
                Some(l) => l.lookup(&mpd_uri).await,
                None => None,
            };
            match looked_up {
                Some(meta) => {
                    track.current_uri = mpd_uri;
                    track.current_meta = meta;
                    track.current_is_synthetic = false;
                }
                None => {
                    track.current_uri = mpd_uri;
                    track.current_meta = Self::synthesize_metadata(&status.current_song);
                    track.current_is_synthetic = true;
                }
            }
        }

        let state = make_state(&status, &track);
        drop(track);
        let changed = self.base.diff_and_store(state).await;
        if !changed.is_empty() {
            self.base.notify(&[("LastChange".to_string(), render_last_change(&changed))]).await;
        }
    }

    pub async fn get_position_info(&self) -> (u32, String, String, String, String, String) {
        let status = self.ctx.facade.current().await.status().await;
        let track = self.track.lock().await;
        let duration = fmt_hms(status.total_ms / 1000);
        let rel = fmt_hms(status.elapsed_ms / 1000);
        (
            status.songpos.map(|p| p + 1).unwrap_or(0),
            duration,
            track.current_meta.clone(),
            track.current_uri.clone(),
            rel.clone(),
            rel,
        )
    }

    pub async fn get_transport_info(&self) -> (&'static str, &'static str, &'static str) {
        let status = self.ctx.facade.current().await.status().await;
        (transport_state_str(status.state), "OK", "1")
    }

    pub async fn get_media_info(&self) -> (u32, String, String, String, String, String) {
        let status = self.ctx.facade.current().await.status().await;
        let track = self.track.lock().await;
        (
            status.queue_len,
            fmt_hms(status.total_ms / 1000),
            track.current_uri.clone(),
            track.current_meta.clone(),
            track.next_uri.clone(),
            track.next_meta.clone(),
        )
    }

    pub fn get_device_capabilities(&self) -> (&'static str, &'static str, &'static str) {
        ("NETWORK", "NOT_IMPLEMENTED", "NOT_IMPLEMENTED")
    }

    pub async fn get_current_transport_actions(&self) -> String {
        let status = self.ctx.facade.current().await.status().await;
        match status.state {
            MpdTransportState::Playing => "Pause,Stop,Seek,Next,Previous".to_string(),
            MpdTransportState::Paused => "Play,Stop,Seek,Next,Previous".to_string(),
            _ => "Play".to_string(),
        }
    }

    pub async fn get_transport_settings(&self) -> (&'static str, &'static str) {
        let status = self.ctx.facade.current().await.status().await;
        let mode = PlayMode::from_mpd_flags(status.repeat, status.random, status.single);
        (mode.as_str(), "NORMAL")
    }

    pub async fn set_play_mode(&self, mode: &str) -> Result<()> {
        // §9 Open Question (c): while we own the queue, externally set
        // play modes are silently ignored (retained behavior).
        if self.ctx.own_queue {
            return Ok(());
        }
        let mode = PlayMode::parse(mode).ok_or_else(|| Error::Validation(format!("unknown play mode {mode:?}")))?;
        let (repeat, random, single) = mode.to_mpd_flags();
        let facade = self.ctx.facade.current().await;
        facade.set_repeat(repeat).await?;
        facade.set_random(random).await?;
        facade.set_single(single).await?;
        Ok(())
    }

    /// spec.md §4.5 `setAVTransportURI` policy.
    pub async fn set_av_transport_uri(&self, uri: &str, metadata: &str) -> Result<()> {
        if self.check_content_format && !metadata.is_empty() {
            if let Ok(song) = SongDescriptor::from_didl_string(metadata) {
                let mime = &song.resource.mime;
                if !mime.is_empty() && !self.connmgr.accepts(&ProtocolInfo::http_get(mime.clone()).to_string()) {
                    return Err(Error::Validation(format!("unsupported content format {mime}")));
                }
            }
        }

        let facade = self.ctx.facade.current().await;
        let was_playing = matches!(facade.status().await.state, MpdTransportState::Playing);

        if self.ctx.own_queue {
            facade.clear_queue().await?;
            facade.set_repeat(false).await?;
            facade.set_random(false).await?;
            facade.set_single(false).await?;
            if !self.keep_consume {
                facade.set_consume(false).await?;
            }
        }

        let song = SongDescriptor::from_didl_string(metadata).ok();
        facade.insert(uri, Some(0), song.as_ref()).await?;

        {
            let mut track = self.track.lock().await;
            track.current_uri = uri.to_string();
            track.current_meta = metadata.to_string();
            track.current_is_synthetic = false;
        }

        if self.autoplay || was_playing {
            facade.play(Some(0)).await?;
        }
        self.refresh(None).await;
        Ok(())
    }

    /// spec.md §4.5 `setNextAVTransportURI`: truncates the queue to two
    /// items so memory is bounded (§8 Scenario B).
    pub async fn set_next_av_transport_uri(&self, uri: &str, metadata: &str) -> Result<()> {
        let facade = self.ctx.facade.current().await;
        if self.ctx.own_queue {
            let status = facade.status().await;
            let Some(pos) = status.songpos else {
                return Err(Error::StateMismatch("setNextAVTransportURI with nothing playing".to_string()));
            };
            if status.queue_len > pos + 1 {
                facade.delete_pos_range(pos + 1, status.queue_len).await?;
            }
            let song = SongDescriptor::from_didl_string(metadata).ok();
            facade.insert(uri, Some(pos + 1), song.as_ref()).await?;
        }

        let mut track = self.track.lock().await;
        track.next_uri = uri.to_string();
        track.next_meta = metadata.to_string();
        drop(track);
        self.refresh(None).await;
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.ctx.facade.current().await.stop().await?;
        self.refresh(None).await;
        Ok(())
    }

    pub async fn play(&self) -> Result<()> {
        self.ctx.facade.current().await.play(None).await?;
        self.refresh(None).await;
        Ok(())
    }

    pub async fn pause(&self) -> Result<()> {
        self.ctx.facade.current().await.pause(true).await?;
        self.refresh(None).await;
        Ok(())
    }

    pub async fn next(&self) -> Result<()> {
        self.ctx.facade.current().await.next().await?;
        self.refresh(None).await;
        Ok(())
    }

    pub async fn previous(&self) -> Result<()> {
        self.ctx.facade.current().await.previous().await?;
        self.refresh(None).await;
        Ok(())
    }

    /// `REL_TIME` and `ABS_TIME` are both interpreted as an absolute
    /// position within the current (and only) track (spec.md §4.5).
    pub async fn seek(&self, _unit: &str, target: &str) -> Result<()> {
        let seconds = parse_hms(target).ok_or_else(|| Error::Validation(format!("bad seek target {target:?}")))?;
        self.ctx.facade.current().await.seek(seconds).await?;
        self.refresh(None).await;
        Ok(())
    }
}

fn make_state(status: &upmpmpd::status::MpdStatus, track: &TrackState) -> StateMap {
    vec![
        ("TransportState".to_string(), transport_state_str(status.state).to_string()),
        ("AVTransportURI".to_string(), track.current_uri.clone()),
        ("AVTransportURIMetaData".to_string(), track.current_meta.clone()),
        ("NextAVTransportURI".to_string(), track.next_uri.clone()),
        ("NextAVTransportURIMetaData".to_string(), track.next_meta.clone()),
        ("CurrentTrackDuration".to_string(), fmt_hms(status.total_ms / 1000)),
        ("RelativeTimePosition".to_string(), fmt_hms(status.elapsed_ms / 1000)),
        (
            "CurrentPlayMode".to_string(),
            PlayMode::from_mpd_flags(status.repeat, status.random, status.single).as_str().to_string(),
        ),
    ]
}

fn transport_state_str(state: MpdTransportState) -> &'static str {
    match state {
        MpdTransportState::Playing => "PLAYING",
        MpdTransportState::Paused => "PAUSED_PLAYBACK",
        MpdTransportState::Stopped => "STOPPED",
        MpdTransportState::Unknown => "NO_MEDIA_PRESENT",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_mode_table_is_bijective() {
        let modes = [
            PlayMode::Normal,
            PlayMode::Shuffle,
            PlayMode::RepeatOne,
            PlayMode::RepeatAll,
            PlayMode::Random,
            PlayMode::Direct1,
        ];
        let mut seen = std::collections::HashSet::new();
        for m in modes {
            let triple = m.to_mpd_flags();
            assert!(seen.insert(triple), "duplicate triple for {m:?}: {triple:?}");
            assert_eq!(PlayMode::from_mpd_flags(triple.0, triple.1, triple.2), m);
        }
    }

    #[test]
    fn unmapped_triple_falls_back_to_normal() {
        assert_eq!(PlayMode::from_mpd_flags(true, true, true), PlayMode::Normal);
    }

    #[test]
    fn last_change_preserves_insertion_order() {
        let changes = vec![
            ("TransportState".to_string(), "PLAYING".to_string()),
            ("AVTransportURI".to_string(), "http://host/a.mp3".to_string()),
        ];
        let xml = render_last_change(&changes);
        let ts = xml.find("TransportState").unwrap();
        let uri = xml.find("AVTransportURI").unwrap();
        assert!(ts < uri);
        assert!(xml.starts_with("<Event xmlns=\"urn:schemas-upnp-org:metadata-1-0/AVT/\">"));
    }

    #[test]
    fn hms_round_trips() {
        assert_eq!(parse_hms("0:02:05"), Some(125));
        assert_eq!(fmt_hms(125), "0:02:05");
    }
}
