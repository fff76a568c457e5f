//! Radio service (spec.md §4.9): an enumerated channel list, channel 0
//! writable ad hoc by the control point, dynamic metadata/audio-URL
//! refreshed by an optional per-channel script on a clamped interval.

use std::process::Stdio;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::warn;

use crate::context::AppContext;
use crate::error::{Error, Result};
use crate::eventsink::EventSink;
use crate::servicebase::{ServiceBase, StateMap};
use crate::services::common::encode_id_array;
use crate::services::info::InfoService;
use crate::services::transport::TransportCompatService;

/// Reload-interval clamp for a misbehaving or slow metadata script
/// (SPEC_FULL §4.9 supplement): never faster than 2s, never slower than
/// one hour.
const MIN_RELOAD_SECS: u64 = 2;
const MAX_RELOAD_SECS: u64 = 3600;
const DEFAULT_RELOAD_SECS: u64 = 30;

/// One configured channel (spec.md §3 "Radio channel").
#[derive(Debug, Clone, Default)]
pub struct RadioChannel {
    pub title: String,
    pub url: String,
    pub art_url: String,
    pub art_script: Option<String>,
    pub meta_script: Option<String>,
    pub prefer_script: bool,
}

impl RadioChannel {
    /// The key used to persist "last selected channel" and to re-find a
    /// channel across a config reload (SPEC_FULL §4.9: keyed by the static
    /// URI or, if empty, the metascript command line).
    fn persistence_key(&self) -> &str {
        if !self.url.is_empty() {
            &self.url
        } else {
            self.meta_script.as_deref().unwrap_or("")
        }
    }
}

#[derive(Default, Clone)]
struct DynamicState {
    title: String,
    artist: String,
    art: String,
    audio_url: String,
}

pub struct RadioService {
    base: ServiceBase,
    ctx: Arc<AppContext>,
    info: Arc<InfoService>,
    transport: Arc<TransportCompatService>,
    channels: Mutex<Vec<RadioChannel>>,
    current_index: AtomicU32,
    dynamic: Mutex<DynamicState>,
    id_array_token: AtomicU64,
    active: std::sync::atomic::AtomicBool,
    /// `radioscript` config key: resolves a static channel URL (e.g. a
    /// `.pls`/`.m3u` playlist pointer) to a directly playable stream URL.
    stream_resolver: Option<String>,
    frozen: Mutex<Option<upmpmpd::status::MpdState>>,
    /// The `reload` hint from the last successful metadata-script run,
    /// seconds, clamped on read (SPEC_FULL §4.9 supplement).
    reload_secs: AtomicU64,
}

impl RadioService {
    pub fn new(
        ctx: Arc<AppContext>,
        info: Arc<InfoService>,
        transport: Arc<TransportCompatService>,
        channels: Vec<RadioChannel>,
        stream_resolver: Option<String>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        RadioService {
            base: ServiceBase::new("Radio", sink),
            ctx,
            info,
            transport,
            channels: Mutex::new(channels),
            current_index: AtomicU32::new(0),
            dynamic: Mutex::new(DynamicState::default()),
            id_array_token: AtomicU64::new(1),
            active: std::sync::atomic::AtomicBool::new(false),
            stream_resolver,
            frozen: Mutex::new(None),
            reload_secs: AtomicU64::new(DEFAULT_RELOAD_SECS),
        }
    }

    /// Spawns the dynamic re-evaluation loop (spec.md §4.9 step 3,
    /// Testable property 9): re-runs the active channel's metadata script
    /// at the interval it last reported, sleeping and re-reading that
    /// interval each time round so a fresh `reload` hint takes effect on
    /// the following cycle. `poll_dynamic_metadata` itself is a no-op
    /// while the radio source isn't active, so one long-lived task is
    /// enough rather than one per activation.
    pub fn start_refresh_task(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(this.reload_interval()).await;
                this.poll_dynamic_metadata().await;
            }
        });
    }

    /// Restores the last-selected channel from the resume-hints file,
    /// matched by persistence key (SPEC_FULL §4.9), defaulting to channel 1
    /// (index 0 being the control-point-writable slot).
    pub async fn restore_last_channel(&self) {
        let Some(key) = self.ctx.resume.get("radiolastchannel") else {
            return;
        };
        let channels = self.channels.lock().await;
        if let Some(idx) = channels.iter().position(|c| c.persistence_key() == key) {
            self.current_index.store(idx as u32, Ordering::Relaxed);
        }
    }

    pub async fn make_state(&self) -> StateMap {
        let channels = self.channels.lock().await;
        let ids: Vec<u32> = (0..channels.len() as u32).collect();
        vec![
            ("Id".to_string(), self.current_index.load(Ordering::Relaxed).to_string()),
            ("ChannelsMax".to_string(), channels.len().to_string()),
            ("IdArray".to_string(), encode_id_array(&ids)),
            ("IdArrayChanged".to_string(), self.id_array_token.load(Ordering::Relaxed).to_string()),
        ]
    }

    pub async fn refresh(&self) {
        let state = self.make_state().await;
        self.base.on_event(state).await;
    }

    pub async fn channel_count(&self) -> u32 {
        self.channels.lock().await.len() as u32
    }

    pub async fn channel(&self, index: u32) -> Result<RadioChannel> {
        self.channels
            .lock()
            .await
            .get(index as usize)
            .cloned()
            .ok_or_else(|| Error::Validation(format!("no radio channel {index}")))
    }

    /// `setChannel(uri, metadata)`: assigns channel 0, the control point's
    /// ad-hoc slot (spec.md §3).
    pub async fn set_channel(&self, title: &str, uri: &str) -> Result<()> {
        let mut channels = self.channels.lock().await;
        if channels.is_empty() {
            channels.push(RadioChannel::default());
        }
        channels[0] = RadioChannel {
            title: title.to_string(),
            url: uri.to_string(),
            ..Default::default()
        };
        self.id_array_token.fetch_add(1, Ordering::Relaxed);
        drop(channels);
        self.refresh().await;
        Ok(())
    }

    /// `setId(id)` then `play()`: activates a channel (spec.md §8 Scenario
    /// E) by resolving its stream (static URL through the resolver helper,
    /// or dynamic metadata/audio-URL through the metadata script), pushing
    /// the result to MPD, and starting playback at position 0.
    pub async fn set_id_and_play(&self, index: u32) -> Result<()> {
        let channel = self.channel(index).await?;
        self.current_index.store(index, Ordering::Relaxed);
        self.ctx.resume.set("radiolastchannel", channel.persistence_key());
        self.transport.set_radio_active(true);

        let (audio_url, title, artist, art) = self.resolve(&channel).await?;

        {
            let mut dyn_state = self.dynamic.lock().await;
            dyn_state.title = title.clone();
            dyn_state.artist = artist.clone();
            dyn_state.art = art;
            dyn_state.audio_url = audio_url.clone();
        }

        let facade = self.ctx.facade.current().await;
        facade.clear_queue().await?;
        facade.insert(&audio_url, Some(0), None).await?;
        facade.set_single(true).await?;
        facade.play(Some(0)).await?;

        let metadata = if artist.is_empty() { channel.title.clone() } else { format!("{} — {}", channel.title, artist) };
        self.info.set_metadata(metadata, title).await;
        self.refresh().await;
        Ok(())
    }

    /// Resolves a channel to a playable URL plus dynamic display fields
    /// (SPEC_FULL §4.9): prefer-script channels, or any channel with no
    /// static URL, always go through the metadata script; a static URL
    /// with no script is resolved once through the stream-resolver helper.
    async fn resolve(&self, channel: &RadioChannel) -> Result<(String, String, String, String)> {
        if channel.prefer_script || channel.url.is_empty() {
            if let Some(script) = &channel.meta_script {
                return self.run_meta_script(script, channel).await;
            }
        }
        if !channel.url.is_empty() {
            let resolved = self.run_resolver(&channel.url).await.unwrap_or_else(|| channel.url.clone());
            let art = self.refresh_art(channel, &channel.title, "").await;
            return Ok((resolved, channel.title.clone(), String::new(), art));
        }
        Err(Error::Validation("radio channel has neither URL nor metadata script".to_string()))
    }

    /// spec.md §7 edge case 9: a failing or slow metadata script leaves
    /// the previous dynamic metadata untouched rather than failing
    /// playback outright. Invoked with the channel's configured argv plus
    /// a trailing `elapsedms <n>` (spec.md §6 "Metadata script" contract).
    async fn run_meta_script(&self, script: &str, channel: &RadioChannel) -> Result<(String, String, String, String)> {
        let elapsed_ms = self.ctx.facade.current().await.status().await.elapsed_ms;

        let mut parts = script.split_whitespace();
        let Some(program) = parts.next() else {
            return Err(Error::Validation("empty radio meta script".to_string()));
        };
        let mut args: Vec<String> = parts.map(str::to_string).collect();
        args.push("elapsedms".to_string());
        args.push(elapsed_ms.to_string());

        let output = tokio::time::timeout(
            Duration::from_secs(10),
            Command::new(program).args(&args).stdin(Stdio::null()).output(),
        )
        .await;

        let parsed = match output {
            Ok(Ok(out)) if out.status.success() => parse_meta_script_output(&String::from_utf8_lossy(out.stdout.as_ref())),
            Ok(Ok(out)) => {
                warn!("radio metadata script `{script}` exited with {}", out.status);
                None
            }
            Ok(Err(e)) => {
                warn!("failed to spawn radio metadata script `{script}`: {e}");
                None
            }
            Err(_) => {
                warn!("radio metadata script `{script}` timed out");
                None
            }
        };

        match parsed {
            Some(out) => {
                let title = out.title.unwrap_or_else(|| channel.title.clone());
                let artist = out.artist.unwrap_or_default();
                let audio_url = out.audio_url.unwrap_or_else(|| channel.url.clone());
                if let Some(reload) = out.reload {
                    self.reload_secs.store(reload, Ordering::Relaxed);
                }
                let art = match out.art_url {
                    Some(art_url) => art_url,
                    None => self.refresh_art(channel, &title, &artist).await,
                };
                Ok((audio_url, title, artist, art))
            }
            None => {
                let dyn_state = self.dynamic.lock().await;
                if dyn_state.audio_url.is_empty() {
                    Err(Error::HelperFailure(format!("radio metadata script `{script}` produced no usable output")))
                } else {
                    Ok((dyn_state.audio_url.clone(), dyn_state.title.clone(), dyn_state.artist.clone(), dyn_state.art.clone()))
                }
            }
        }
    }

    /// Runs the channel's art-fetch script, if configured, only when
    /// `(title, artist)` differs from the last fetch (spec.md §4.9 step
    /// 4, §6 "Art script" contract: no arguments, first trimmed stdout
    /// line is the art URL). Falls back to the channel's static `artUrl`
    /// when there is no script, the script fails, or nothing changed yet.
    async fn refresh_art(&self, channel: &RadioChannel, title: &str, artist: &str) -> String {
        let Some(script) = &channel.art_script else {
            return channel.art_url.clone();
        };
        {
            let dyn_state = self.dynamic.lock().await;
            if dyn_state.title == title && dyn_state.artist == artist && !dyn_state.art.is_empty() {
                return dyn_state.art.clone();
            }
        }
        let mut parts = script.split_whitespace();
        let Some(program) = parts.next() else {
            return channel.art_url.clone();
        };
        let args: Vec<&str> = parts.collect();
        match tokio::time::timeout(Duration::from_secs(10), Command::new(program).args(&args).stdin(Stdio::null()).output()).await {
            Ok(Ok(out)) if out.status.success() => String::from_utf8_lossy(&out.stdout)
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| channel.art_url.clone()),
            Ok(Ok(out)) => {
                warn!("radio art script `{script}` exited with {}", out.status);
                channel.art_url.clone()
            }
            Ok(Err(e)) => {
                warn!("failed to spawn radio art script `{script}`: {e}");
                channel.art_url.clone()
            }
            Err(_) => {
                warn!("radio art script `{script}` timed out");
                channel.art_url.clone()
            }
        }
    }

    async fn run_resolver(&self, url: &str) -> Option<String> {
        let cmd = self.stream_resolver.as_ref()?;
        let mut parts = cmd.split_whitespace();
        let program = parts.next()?;
        let mut args: Vec<&str> = parts.collect();
        args.push(url);
        let output = Command::new(program).args(&args).output().await.ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8_lossy(&output.stdout).lines().next().map(|l| l.trim().to_string())
    }

    /// Re-runs the active channel's metadata script and pushes any change
    /// to the info service; scheduled by [`Self::start_refresh_task`] on
    /// [`Self::reload_interval`] (SPEC_FULL §4.9 supplement). A changed
    /// `audioUrl` is pushed to MPD as a fresh queue entry rather than just
    /// relabelled, since the script is reporting a new stream identity.
    pub async fn poll_dynamic_metadata(&self) {
        if !self.active.load(Ordering::Relaxed) {
            return;
        }
        let index = self.current_index.load(Ordering::Relaxed);
        let Ok(channel) = self.channel(index).await else {
            return;
        };
        let Some(script) = channel.meta_script.clone() else {
            return;
        };
        let Ok((audio_url, title, artist, art)) = self.run_meta_script(&script, &channel).await else {
            return;
        };

        let audio_url_changed = {
            let dyn_state = self.dynamic.lock().await;
            !audio_url.is_empty() && dyn_state.audio_url != audio_url
        };
        if audio_url_changed {
            let facade = self.ctx.facade.current().await;
            let switched = async {
                facade.clear_queue().await?;
                facade.insert(&audio_url, Some(0), None).await?;
                facade.play(Some(0)).await
            }
            .await;
            if let Err(e) = switched {
                tracing::warn!(channel = %channel.title, error = %e, "failed to switch MPD to new dynamic audio URL, leaving previous stream in place");
                return;
            }
        }

        {
            let mut dyn_state = self.dynamic.lock().await;
            dyn_state.title = title.clone();
            dyn_state.artist = artist.clone();
            dyn_state.art = art;
            dyn_state.audio_url = audio_url;
        }

        let metadata = if artist.is_empty() { channel.title.clone() } else { format!("{} — {}", channel.title, artist) };
        self.info.set_metadata(metadata, title).await;
    }

    /// The `reload` hint from the last successful metadata-script run,
    /// clamped to `[MIN_RELOAD_SECS, MAX_RELOAD_SECS]` (SPEC_FULL §4.9
    /// supplement, Testable property 9's "minimum 2s").
    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_secs.load(Ordering::Relaxed).clamp(MIN_RELOAD_SECS, MAX_RELOAD_SECS))
    }

    /// spec.md §4.9 "setActive": deactivation saves MPD state and stops,
    /// clearing the transport-compat radio flag; reactivation restores
    /// whatever was saved. A first-ever activation with nothing saved yet
    /// just marks the source active and waits for an explicit `SetId`/
    /// `Play` from the control point.
    pub async fn set_active(&self, active: bool) -> Result<()> {
        if active == self.active.load(Ordering::Relaxed) {
            return Ok(());
        }
        let facade = self.ctx.facade.current().await;
        if !active {
            let saved = facade.save_state(None).await?;
            *self.frozen.lock().await = Some(saved);
            facade.stop().await?;
            self.transport.set_radio_active(false);
            self.active.store(false, Ordering::Relaxed);
            self.info.clear_radio_override().await;
        } else {
            if let Some(saved) = self.frozen.lock().await.take() {
                facade.restore_state(&saved).await?;
                self.transport.set_radio_active(true);
            }
            self.active.store(true, Ordering::Relaxed);
        }
        Ok(())
    }
}

/// A metadata script's stdout (spec.md §6 "Metadata script" contract): a
/// single JSON object, every key optional so a script can report only
/// what changed.
#[derive(Debug, Deserialize, Default)]
struct MetaScriptOutput {
    title: Option<String>,
    artist: Option<String>,
    #[serde(rename = "artUrl")]
    art_url: Option<String>,
    #[serde(rename = "audioUrl")]
    audio_url: Option<String>,
    reload: Option<u64>,
}

fn parse_meta_script_output(text: &str) -> Option<MetaScriptOutput> {
    serde_json::from_str(text.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventsink::MemoryEventSink;
    use upmpmeta::MetaCache;
    use upmpmpd::fake::FakeMpd;

    async fn setup() -> (RadioService, Arc<AppContext>) {
        let dir = tempfile::tempdir().unwrap();
        let meta = Arc::new(MetaCache::load(dir.path().join("meta"), std::time::Duration::from_millis(1)).await.unwrap());
        let ctx = AppContext::new(Arc::new(FakeMpd::new()), meta, dir.path().to_path_buf(), true);
        let sink = Arc::new(MemoryEventSink::new());
        let info = Arc::new(InfoService::new(ctx.clone(), false, sink.clone()));
        let connmgr = Arc::new(crate::services::connmgr::ConnectionManagerService::new(
            crate::services::connmgr::default_sink_formats(),
            sink.clone(),
        ));
        let transport = Arc::new(TransportCompatService::new(ctx.clone(), connmgr, true, false, false, sink.clone()));
        let channels = vec![
            RadioChannel::default(),
            RadioChannel {
                title: "Station One".to_string(),
                url: "http://station/one.pls".to_string(),
                ..Default::default()
            },
        ];
        let svc = RadioService::new(ctx.clone(), info, transport, channels, None, sink);
        (svc, ctx)
    }

    #[tokio::test]
    async fn set_channel_assigns_slot_zero() {
        let (svc, _ctx) = setup().await;
        svc.set_channel("Ad Hoc", "http://example/stream.mp3").await.unwrap();
        let channel = svc.channel(0).await.unwrap();
        assert_eq!(channel.title, "Ad Hoc");
        assert_eq!(channel.url, "http://example/stream.mp3");
    }

    #[tokio::test]
    async fn reload_interval_is_clamped() {
        let (svc, _ctx) = setup().await;
        let secs = svc.reload_interval().as_secs();
        assert!((MIN_RELOAD_SECS..=MAX_RELOAD_SECS).contains(&secs));
    }

    #[tokio::test]
    async fn activating_static_channel_without_resolver_falls_back_to_raw_url() {
        let (svc, ctx) = setup().await;
        svc.set_id_and_play(1).await.unwrap();
        let queue = ctx.facade.current().await.get_queue_data().await.unwrap();
        assert_eq!(queue[0].resource.uri, "http://station/one.pls");
    }
}
