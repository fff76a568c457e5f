//! Product/source-select service (spec.md §4.10): the multiplexer that
//! decides which of playlist, radio, receiver, or an external source is
//! currently live, switching by deactivating the outgoing view and
//! activating the incoming one.

use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;
use tracing::warn;

use crate::context::AppContext;
use crate::error::{Error, Result};
use crate::eventsink::EventSink;
use crate::servicebase::{ServiceBase, StateMap};
use crate::services::playlist::PlaylistService;
use crate::services::radio::RadioService;
use crate::services::songcast::SongcastOrchestrator;

/// One entry in the source list (spec.md §4.10): `playlist` first, then
/// whichever optional views are configured, then any externally-defined
/// source scripts.
#[derive(Debug, Clone)]
pub struct Source {
    pub system_name: String,
    pub kind: &'static str,
    pub visible: bool,
}

/// An externally-defined source, discovered from `ohsrc_scripts_dir`
/// (spec.md §4.10: `Type-Name` files, `Type ∈ {Analog, Digital, Hdmi}`,
/// must be executable).
#[derive(Debug, Clone)]
pub struct ExternalSource {
    pub system_name: String,
    pub script_path: String,
}

fn is_valid_external_name(name: &str) -> bool {
    let Some((kind, rest)) = name.split_once('-') else {
        return false;
    };
    matches!(kind, "Analog" | "Digital" | "Hdmi") && !rest.is_empty()
}

/// Scans `dir` for executable files whose name matches `Type-Name`
/// (SPEC_FULL §4.10 supplement).
pub fn discover_external_sources(dir: &std::path::Path) -> Vec<ExternalSource> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut found = Vec::new();
    for entry in entries.flatten() {
        let Ok(meta) = entry.metadata() else { continue };
        if !meta.is_file() {
            continue;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if meta.permissions().mode() & 0o111 == 0 {
                continue;
            }
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if is_valid_external_name(&name) {
            found.push(ExternalSource {
                system_name: name,
                script_path: entry.path().to_string_lossy().to_string(),
            });
        }
    }
    found.sort_by(|a, b| a.system_name.cmp(&b.system_name));
    found
}

pub struct ProductService {
    base: ServiceBase,
    ctx: Arc<AppContext>,
    playlist: Arc<PlaylistService>,
    radio: Option<Arc<RadioService>>,
    songcast: Option<Arc<SongcastOrchestrator>>,
    externals: Vec<ExternalSource>,
    receiver_enabled: bool,
    standby_cmd: Option<String>,
    friendly_name: String,
    source_index: std::sync::atomic::AtomicU32,
    xml_change_count: std::sync::atomic::AtomicU64,
}

impl ProductService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: Arc<AppContext>,
        playlist: Arc<PlaylistService>,
        radio: Option<Arc<RadioService>>,
        songcast: Option<Arc<SongcastOrchestrator>>,
        externals: Vec<ExternalSource>,
        receiver_enabled: bool,
        standby_cmd: Option<String>,
        friendly_name: String,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        ProductService {
            base: ServiceBase::new("Product", sink),
            ctx,
            playlist,
            radio,
            songcast,
            externals,
            receiver_enabled,
            standby_cmd,
            friendly_name,
            source_index: std::sync::atomic::AtomicU32::new(0),
            xml_change_count: std::sync::atomic::AtomicU64::new(1),
        }
    }

    fn sources(&self) -> Vec<Source> {
        let mut list = vec![Source { system_name: "Playlist".to_string(), kind: "Playlist", visible: true }];
        if self.radio.is_some() {
            list.push(Source { system_name: "Radio".to_string(), kind: "Radio", visible: true });
        }
        if self.receiver_enabled {
            list.push(Source { system_name: "Receiver".to_string(), kind: "Receiver", visible: true });
        }
        if self.songcast.is_some() {
            list.push(Source { system_name: "SongcastToPlaylist".to_string(), kind: "Songcast", visible: true });
            if self.radio.is_some() {
                list.push(Source { system_name: "SongcastToRadio".to_string(), kind: "Songcast", visible: true });
            }
        }
        for ext in &self.externals {
            list.push(Source { system_name: ext.system_name.clone(), kind: "Source", visible: true });
        }
        list
    }

    pub fn manufacturer(&self) -> &'static str {
        "Linn Products Limited Upmpd Compat Layer"
    }

    pub fn model(&self) -> &'static str {
        "Upmpd"
    }

    pub fn product_name(&self) -> &str {
        &self.friendly_name
    }

    /// `standby()`: queries the helper command (spec.md §4.10), defaulting
    /// to "not in standby" when none is configured.
    pub async fn standby(&self) -> bool {
        let Some(cmd) = &self.standby_cmd else {
            return false;
        };
        let Some((program, args)) = split_command(cmd) else {
            return false;
        };
        match Command::new(program).args(&args).arg("query").output().await {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout).trim() == "1",
            _ => false,
        }
    }

    pub async fn set_standby(&self, on: bool) -> Result<()> {
        let Some(cmd) = &self.standby_cmd else {
            return Ok(());
        };
        let Some((program, args)) = split_command(cmd) else {
            return Ok(());
        };
        let arg = if on { "1" } else { "0" };
        match Command::new(program).args(&args).arg(arg).stdout(Stdio::null()).status().await {
            Ok(status) if !status.success() => {
                warn!("standby helper `{cmd}` exited with {status}");
                Err(Error::HelperFailure(format!("standby helper `{cmd}` exited with {status}")))
            }
            Err(e) => Err(Error::HelperFailure(format!("failed to spawn standby helper `{cmd}`: {e}"))),
            Ok(_) => Ok(()),
        }
    }

    pub fn source_count(&self) -> u32 {
        self.sources().len() as u32
    }

    pub fn source_xml(&self) -> String {
        let mut xml = String::from("<SourceList>");
        for (i, src) in self.sources().iter().enumerate() {
            xml.push_str(&format!(
                "<Source><SystemName>{}</SystemName><Type>{}</Type><Visible>{}</Visible><Index>{}</Index></Source>",
                src.system_name, src.kind, src.visible, i
            ));
        }
        xml.push_str("</SourceList>");
        xml
    }

    pub fn source_index(&self) -> u32 {
        self.source_index.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn source(&self, index: u32) -> Result<Source> {
        self.sources().into_iter().nth(index as usize).ok_or_else(|| Error::Validation(format!("no source at index {index}")))
    }

    pub fn source_xml_change_count(&self) -> u64 {
        self.xml_change_count.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub async fn make_state(&self) -> StateMap {
        vec![
            ("SourceIndex".to_string(), self.source_index().to_string()),
            ("SourceCount".to_string(), self.source_count().to_string()),
            ("SourceXml".to_string(), self.source_xml()),
            ("Standby".to_string(), self.standby().await.to_string()),
        ]
    }

    pub async fn refresh(&self) {
        let state = self.make_state().await;
        self.base.on_event(state).await;
    }

    pub async fn set_source_index(&self, index: u32) -> Result<()> {
        let target = self.source(index)?;
        self.switch_to(&target).await
    }

    pub async fn set_source_index_by_name(&self, name: &str) -> Result<()> {
        let sources = self.sources();
        let index = sources
            .iter()
            .position(|s| s.system_name.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::Validation(format!("no source named {name:?}")))?;
        self.switch_to(&sources[index]).await
    }

    pub async fn set_source_by_system_name(&self, name: &str) -> Result<()> {
        self.set_source_index_by_name(name).await
    }

    /// spec.md §4.10 "Switching source": deactivate outgoing, stop any
    /// associated songcast helper, activate incoming, start its helper if
    /// applicable, persist the selection.
    async fn switch_to(&self, target: &Source) -> Result<()> {
        let previous_index = self.source_index();
        let previous = self.source(previous_index).ok();

        if let Some(previous) = &previous {
            if previous.system_name == "Playlist" {
                self.playlist.set_active(false).await?;
            } else if previous.system_name == "Radio" {
                if let Some(radio) = &self.radio {
                    radio.set_active(false).await?;
                }
            }
        }
        if let Some(songcast) = &self.songcast {
            songcast.stop().await?;
        }

        match target.kind {
            "Playlist" => {
                self.playlist.set_active(true).await?;
            }
            "Radio" => {
                if let Some(radio) = &self.radio {
                    radio.set_active(true).await?;
                }
            }
            "Songcast" => {
                if let Some(songcast) = &self.songcast {
                    songcast.start_internal().await?;
                }
                if target.system_name == "SongcastToPlaylist" {
                    self.playlist.set_active(true).await?;
                } else if let Some(radio) = &self.radio {
                    radio.set_active(true).await?;
                }
            }
            "Source" => {
                if let Some(ext) = self.externals.iter().find(|e| e.system_name == target.system_name) {
                    if let Some(songcast) = &self.songcast {
                        songcast.start_external(&ext.script_path, &self.friendly_name).await?;
                    }
                }
            }
            _ => {}
        }

        let index = self.sources().iter().position(|s| s.system_name == target.system_name).unwrap_or(0) as u32;
        self.source_index.store(index, std::sync::atomic::Ordering::Relaxed);
        self.ctx.resume.set("lastsourcename", &target.system_name);
        self.refresh().await;
        Ok(())
    }

    /// Restores the last-selected source from the resume-hints file at
    /// startup (spec.md §4.10 "restored on startup").
    pub async fn restore_last_source(&self) {
        if let Some(name) = self.ctx.resume.get("lastsourcename") {
            let _ = self.set_source_index_by_name(&name).await;
        }
    }
}

fn split_command(command: &str) -> Option<(&str, Vec<&str>)> {
    let mut parts = command.split_whitespace();
    let program = parts.next()?;
    Some((program, parts.collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventsink::MemoryEventSink;
    use crate::services::connmgr::{default_sink_formats, ConnectionManagerService};
    use crate::services::info::InfoService;
    use crate::services::transport::TransportCompatService;
    use upmpmeta::MetaCache;
    use upmpmpd::fake::FakeMpd;

    #[test]
    fn recognizes_valid_external_source_names() {
        assert!(is_valid_external_name("Analog-Turntable"));
        assert!(is_valid_external_name("Hdmi-TV"));
        assert!(!is_valid_external_name("Weird-Thing"));
        assert!(!is_valid_external_name("NoSeparator"));
    }

    async fn setup() -> Arc<ProductService> {
        let dir = tempfile::tempdir().unwrap();
        let meta = Arc::new(MetaCache::load(dir.path().join("meta"), std::time::Duration::from_millis(1)).await.unwrap());
        let ctx = AppContext::new(Arc::new(FakeMpd::new()), meta, dir.path().to_path_buf(), true);
        let sink = Arc::new(MemoryEventSink::new());
        let playlist = Arc::new(PlaylistService::new(ctx.clone(), sink.clone()));
        let info = Arc::new(InfoService::new(ctx.clone(), false, sink.clone()));
        let connmgr = Arc::new(ConnectionManagerService::new(default_sink_formats(), sink.clone()));
        let transport = Arc::new(TransportCompatService::new(ctx.clone(), connmgr, true, false, false, sink.clone()));
        let radio = Arc::new(RadioService::new(ctx.clone(), info, transport, Vec::new(), None, sink.clone()));
        Arc::new(ProductService::new(
            ctx.clone(),
            playlist,
            Some(radio),
            None,
            Vec::new(),
            false,
            None,
            "TestPlayer".to_string(),
            sink,
        ))
    }

    #[tokio::test]
    async fn default_source_list_has_playlist_and_radio() {
        let svc = setup().await;
        let sources = svc.sources();
        assert_eq!(sources[0].system_name, "Playlist");
        assert!(sources.iter().any(|s| s.system_name == "Radio"));
    }

    #[tokio::test]
    async fn switching_to_radio_then_back_round_trips() {
        let svc = setup().await;
        svc.set_source_index_by_name("Radio").await.unwrap();
        assert_eq!(svc.source(svc.source_index()).unwrap().system_name, "Radio");
        svc.set_source_index_by_name("Playlist").await.unwrap();
        assert_eq!(svc.source(svc.source_index()).unwrap().system_name, "Playlist");
    }
}
