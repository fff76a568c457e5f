//! Playlist service (OpenHome `Playlist`, spec.md §4.4): owns the MPD
//! queue, gives it stable per-item ids across restarts, and freezes its
//! visible state while another source is active.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use upmpdidl::SongDescriptor;
use upmpmpd::status::MpdState;

use crate::context::AppContext;
use crate::error::{Error, Result};
use crate::eventsink::EventSink;
use crate::servicebase::{ServiceBase, StateMap};
use crate::services::common::{encode_id_array, transport_state_str};
use crate::services::transport::UriMetadataLookup;

const TRACKS_MAX: u32 = 9999;
const PROTOCOL_INFO: &str = "http-get:*:audio/mpeg:*,http-get:*:audio/flac:*,http-get:*:audio/x-flac:*,http-get:*:audio/ogg:*,http-get:*:audio/wav:*";

pub struct PlaylistService {
    base: ServiceBase,
    ctx: Arc<AppContext>,
    /// Bumped on every queue mutation; `IdArrayChanged(token)` compares
    /// against the value current when `IdArray` was last called.
    id_array_token: AtomicU64,
    last_returned_token: AtomicU64,
    active: AtomicBool,
    frozen: Mutex<Option<MpdState>>,
}

impl PlaylistService {
    pub fn new(ctx: Arc<AppContext>, sink: Arc<dyn EventSink>) -> Self {
        PlaylistService {
            base: ServiceBase::new("Playlist", sink),
            ctx,
            id_array_token: AtomicU64::new(1),
            last_returned_token: AtomicU64::new(0),
            active: AtomicBool::new(true),
            frozen: Mutex::new(None),
        }
    }

    fn bump_token(&self) {
        self.id_array_token.fetch_add(1, Ordering::Relaxed);
    }

    async fn queue_ids(&self) -> Result<Vec<u32>> {
        let queue = self.ctx.facade.current().await.get_queue_data().await?;
        Ok(queue.iter().filter_map(|s| s.mpd_id).collect())
    }

    pub async fn make_state(&self) -> StateMap {
        let facade = self.ctx.facade.current().await;
        let status = facade.status().await;
        let ids = self.queue_ids().await.unwrap_or_default();
        vec![
            ("TransportState".to_string(), transport_state_str(status.state).to_string()),
            ("Repeat".to_string(), status.repeat.to_string()),
            ("Shuffle".to_string(), status.random.to_string()),
            ("TracksMax".to_string(), TRACKS_MAX.to_string()),
            ("Id".to_string(), status.songid.unwrap_or(0).to_string()),
            ("IdArray".to_string(), encode_id_array(&ids)),
            ("IdArrayChanged".to_string(), self.id_array_token.load(Ordering::Relaxed).to_string()),
            ("ProtocolInfo".to_string(), PROTOCOL_INFO.to_string()),
        ]
    }

    pub async fn refresh(&self) {
        if !self.active.load(Ordering::Relaxed) {
            return;
        }
        let state = self.make_state().await;
        self.base.on_event(state).await;
    }

    pub async fn play(&self) -> Result<()> {
        self.ctx.facade.current().await.play(None).await?;
        self.refresh().await;
        Ok(())
    }

    pub async fn pause(&self) -> Result<()> {
        self.ctx.facade.current().await.pause(true).await?;
        self.refresh().await;
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.ctx.facade.current().await.stop().await?;
        self.refresh().await;
        Ok(())
    }

    pub async fn next(&self) -> Result<()> {
        self.ctx.facade.current().await.next().await?;
        self.refresh().await;
        Ok(())
    }

    pub async fn previous(&self) -> Result<()> {
        self.ctx.facade.current().await.previous().await?;
        self.refresh().await;
        Ok(())
    }

    pub async fn set_repeat(&self, on: bool) -> Result<()> {
        self.ctx.facade.current().await.set_repeat(on).await?;
        self.refresh().await;
        Ok(())
    }

    pub async fn set_shuffle(&self, on: bool) -> Result<()> {
        self.ctx.facade.current().await.set_random(on).await?;
        self.refresh().await;
        Ok(())
    }

    pub async fn seek_second_absolute(&self, seconds: u32) -> Result<()> {
        self.ctx.facade.current().await.seek(seconds).await?;
        self.refresh().await;
        Ok(())
    }

    pub async fn seek_second_relative(&self, delta: i32) -> Result<()> {
        let status = self.ctx.facade.current().await.status().await;
        let current = (status.elapsed_ms / 1000) as i32;
        let target = (current + delta).max(0) as u32;
        self.seek_second_absolute(target).await
    }

    pub async fn seek_id(&self, id: u32) -> Result<()> {
        self.ctx.facade.current().await.play_id(id).await?;
        self.refresh().await;
        Ok(())
    }

    pub async fn seek_index(&self, index: u32) -> Result<()> {
        self.ctx.facade.current().await.play(Some(index)).await?;
        self.refresh().await;
        Ok(())
    }

    pub async fn transport_state(&self) -> &'static str {
        transport_state_str(self.ctx.facade.current().await.status().await.state)
    }

    pub async fn id(&self) -> u32 {
        self.ctx.facade.current().await.status().await.songid.unwrap_or(0)
    }

    /// `read(id) -> didl`: metadata cache first (so restart-surviving
    /// metadata wins), falling back to whatever MPD knows about the entry.
    pub async fn read(&self, id: u32) -> Result<String> {
        let facade = self.ctx.facade.current().await;
        let song = facade
            .stat_song(None, Some(id))
            .await?
            .ok_or_else(|| Error::Validation(format!("no such id {id}")))?;
        if let Some(cached) = self.ctx.meta.get(&song.resource.uri).await {
            return Ok(cached);
        }
        Ok(song.to_didl_string()?)
    }

    pub async fn read_list(&self, ids: &[u32]) -> Vec<(u32, String)> {
        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            if let Ok(didl) = self.read(id).await {
                out.push((id, didl));
            }
        }
        out
    }

    /// `insert(afterid, uri, metadata) -> newid`: stores the metadata in
    /// the persistent cache *before* the MPD insertion so even a crash
    /// mid-insert leaves metadata recoverable by URI (spec.md §4.4, §3
    /// invariant "a playlist entry's URI uniquely maps into the metadata
    /// cache").
    pub async fn insert(&self, after_id: u32, uri: &str, metadata: &str) -> Result<u32> {
        self.ctx.meta.put(uri, metadata).await;
        let song = SongDescriptor::from_didl_string(metadata).ok();

        let facade = self.ctx.facade.current().await;
        let new_id = if after_id == 0 {
            facade.insert(uri, Some(0), song.as_ref()).await?
        } else {
            facade.insert_after_id(uri, after_id, song.as_ref()).await?
        };
        self.bump_token();
        self.refresh().await;
        Ok(new_id)
    }

    pub async fn delete_id(&self, id: u32) -> Result<()> {
        self.ctx.facade.current().await.delete_id(id).await?;
        self.bump_token();
        self.refresh().await;
        Ok(())
    }

    pub async fn delete_all(&self) -> Result<()> {
        self.ctx.facade.current().await.clear_queue().await?;
        self.bump_token();
        self.refresh().await;
        Ok(())
    }

    pub fn tracks_max(&self) -> u32 {
        TRACKS_MAX
    }

    /// `IdArray -> (token, array)`: returned token is what a subsequent
    /// `IdArrayChanged` call should be compared against (§8 Scenario C).
    pub async fn id_array(&self) -> (u64, String) {
        let ids = self.queue_ids().await.unwrap_or_default();
        let token = self.id_array_token.load(Ordering::Relaxed);
        self.last_returned_token.store(token, Ordering::Relaxed);
        (token, encode_id_array(&ids))
    }

    pub fn id_array_changed(&self, token: u64) -> bool {
        token != self.id_array_token.load(Ordering::Relaxed)
    }

    pub fn protocol_info(&self) -> &'static str {
        PROTOCOL_INFO
    }

    /// Deactivation path (spec.md §4.4 "Active/inactive"): save MPD state
    /// and clear its queue, freezing the upnp-visible state so events keep
    /// reporting the saved view while another source is live.
    pub async fn set_active(&self, active: bool) -> Result<()> {
        if active == self.active.load(Ordering::Relaxed) {
            return Ok(());
        }
        let facade = self.ctx.facade.current().await;
        if !active {
            let saved = facade.save_state(None).await?;
            *self.frozen.lock().await = Some(saved);
            facade.clear_queue().await?;
            self.active.store(false, Ordering::Relaxed);
        } else {
            if let Some(saved) = self.frozen.lock().await.take() {
                facade.restore_state(&saved).await?;
            }
            self.active.store(true, Ordering::Relaxed);
            self.refresh().await;
        }
        Ok(())
    }

    /// Re-identify a track by URI after MPD reassigned ids on restart
    /// (SPEC_FULL §4.4 `idFromOldId`): searches the current queue for the
    /// URI that used to sit at `old_id`, returning its new id.
    pub async fn id_from_old_id(&self, old_uri_hint: &str) -> Option<u32> {
        let facade = self.ctx.facade.current().await;
        let queue = facade.get_queue_data().await.ok()?;
        queue.iter().find(|s| s.resource.uri == old_uri_hint).and_then(|s| s.mpd_id)
    }
}

#[async_trait::async_trait]
impl UriMetadataLookup for PlaylistService {
    async fn lookup(&self, uri: &str) -> Option<String> {
        self.ctx.meta.get(uri).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventsink::MemoryEventSink;
    use crate::services::common;
    use upmpmeta::MetaCache;
    use upmpmpd::fake::FakeMpd;

    async fn context() -> Arc<AppContext> {
        let dir = tempfile::tempdir().unwrap();
        let meta = Arc::new(MetaCache::load(dir.path().join("meta"), std::time::Duration::from_millis(1)).await.unwrap());
        AppContext::new(Arc::new(FakeMpd::new()), meta, dir.path().to_path_buf(), true)
    }

    fn didl_for(title: &str, uri: &str) -> String {
        let song = SongDescriptor {
            id: "0".into(),
            parent_id: "0".into(),
            title: title.into(),
            resource: upmpdidl::SongResource {
                uri: uri.into(),
                mime: "audio/mpeg".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        song.to_didl_string().unwrap()
    }

    #[tokio::test]
    async fn insert_into_empty_queue_then_id_array_changed_contract() {
        let ctx = context().await;
        let sink = Arc::new(MemoryEventSink::new());
        let svc = PlaylistService::new(ctx, sink);

        let id1 = svc.insert(0, "u1", &didl_for("T1", "u1")).await.unwrap();
        let (token, array) = svc.id_array().await;
        assert_eq!(common::decode_id_array(&array), vec![id1]);
        assert!(!svc.id_array_changed(token));

        svc.insert(0, "u2", &didl_for("T2", "u2")).await.unwrap();
        assert!(svc.id_array_changed(token));
    }

    #[tokio::test]
    async fn deactivate_then_reactivate_restores_queue() {
        let ctx = context().await;
        let sink = Arc::new(MemoryEventSink::new());
        let svc = PlaylistService::new(ctx.clone(), sink);
        svc.insert(0, "u1", &didl_for("T1", "u1")).await.unwrap();
        svc.insert(0, "u2", &didl_for("T2", "u2")).await.unwrap();

        svc.set_active(false).await.unwrap();
        assert_eq!(ctx.facade.current().await.get_queue_data().await.unwrap().len(), 0);

        svc.set_active(true).await.unwrap();
        assert_eq!(ctx.facade.current().await.get_queue_data().await.unwrap().len(), 2);
    }
}
