//! An in-memory stand-in for [`crate::facade::MpdFacade`] used by the
//! service test suites (spec.md §4.2, referenced by the test-tooling
//! supplement in the workspace's expanded spec): implements [`Mpd`] against
//! a plain `Vec`, with no network I/O, so service logic can be exercised
//! deterministically.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use upmpdidl::SongDescriptor;

use crate::error::{Error, Result};
use crate::facade::{Mpd, SubscriberFn};
use crate::status::{InsertShortcut, MpdState, MpdStatus, TransportState};

struct State {
    status: MpdStatus,
    queue: Vec<SongDescriptor>,
    shortcut: InsertShortcut,
    premute_volume: i32,
    next_id: u32,
    subscribers: Vec<SubscriberFn>,
}

/// Test double for [`Mpd`]. Every queue operation keeps `status.queue_len`,
/// `queue_version` and song ids consistent so service code that diffs
/// against them behaves exactly as it would against a real server.
pub struct FakeMpd {
    state: Mutex<State>,
}

impl Default for FakeMpd {
    fn default() -> Self {
        FakeMpd {
            state: Mutex::new(State {
                status: MpdStatus {
                    state: TransportState::Stopped,
                    volume: Some(50),
                    ..Default::default()
                },
                queue: Vec::new(),
                shortcut: InsertShortcut::default(),
                premute_volume: 0,
                next_id: 1,
                subscribers: Vec::new(),
            }),
        }
    }
}

impl FakeMpd {
    pub fn new() -> Self {
        Self::default()
    }

    async fn notify(&self, guard: &mut tokio::sync::MutexGuard<'_, State>) {
        guard.status.trackcounter += 1;
        guard.status.queue_len = guard.queue.len() as u32;
        let snapshot = guard.status.clone();
        for sub in &guard.subscribers {
            sub(&snapshot);
        }
    }
}

#[async_trait]
impl Mpd for FakeMpd {
    async fn status(&self) -> MpdStatus {
        self.state.lock().await.status.clone()
    }

    async fn play(&self, pos: Option<u32>) -> Result<()> {
        let mut guard = self.state.lock().await;
        if let Some(pos) = pos {
            guard.status.songpos = Some(pos);
            guard.status.songid = guard.queue.get(pos as usize).and_then(|s| s.mpd_id);
        }
        guard.status.state = TransportState::Playing;
        self.notify(&mut guard).await;
        Ok(())
    }

    async fn play_id(&self, id: u32) -> Result<()> {
        let mut guard = self.state.lock().await;
        let pos = guard.queue.iter().position(|s| s.mpd_id == Some(id));
        guard.status.songpos = pos.map(|p| p as u32);
        guard.status.songid = Some(id);
        guard.status.state = TransportState::Playing;
        self.notify(&mut guard).await;
        Ok(())
    }

    async fn pause(&self, on: bool) -> Result<()> {
        let mut guard = self.state.lock().await;
        guard.status.state = if on { TransportState::Paused } else { TransportState::Playing };
        self.notify(&mut guard).await;
        Ok(())
    }

    async fn toggle_pause(&self) -> Result<()> {
        let playing = matches!(self.status().await.state, TransportState::Playing);
        self.pause(playing).await
    }

    async fn stop(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        guard.status.state = TransportState::Stopped;
        guard.status.songpos = None;
        guard.status.songid = None;
        self.notify(&mut guard).await;
        Ok(())
    }

    async fn next(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        let next_pos = guard.status.songpos.map(|p| p + 1).unwrap_or(0);
        if (next_pos as usize) < guard.queue.len() {
            guard.status.songpos = Some(next_pos);
            guard.status.songid = guard.queue[next_pos as usize].mpd_id;
        }
        self.notify(&mut guard).await;
        Ok(())
    }

    async fn previous(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        if let Some(pos) = guard.status.songpos.filter(|p| *p > 0) {
            guard.status.songpos = Some(pos - 1);
            guard.status.songid = guard.queue[(pos - 1) as usize].mpd_id;
        }
        self.notify(&mut guard).await;
        Ok(())
    }

    async fn seek(&self, seconds: u32) -> Result<()> {
        let mut guard = self.state.lock().await;
        guard.status.elapsed_ms = seconds * 1000;
        self.notify(&mut guard).await;
        Ok(())
    }

    async fn insert(&self, uri: &str, pos: Option<u32>, meta: Option<&SongDescriptor>) -> Result<u32> {
        let mut guard = self.state.lock().await;
        let id = guard.next_id;
        guard.next_id += 1;

        let mut song = meta.cloned().unwrap_or_default();
        song.resource.uri = uri.to_string();
        song.mpd_id = Some(id);

        let pos = pos.unwrap_or(guard.queue.len() as u32) as usize;
        let pos = pos.min(guard.queue.len());
        guard.queue.insert(pos, song);
        guard.status.queue_version += 1;
        self.notify(&mut guard).await;
        Ok(id)
    }

    async fn insert_after_id(&self, uri: &str, id: u32, meta: Option<&SongDescriptor>) -> Result<u32> {
        let qvers = self.status().await.queue_version;
        let mut guard = self.state.lock().await;
        let pos = if guard.shortcut.id == id && guard.shortcut.qvers == qvers {
            guard.shortcut.pos + 1
        } else if id == 0 {
            0
        } else {
            guard
                .queue
                .iter()
                .position(|s| s.mpd_id == Some(id))
                .map(|p| p as u32 + 1)
                .unwrap_or(guard.queue.len() as u32)
        };
        drop(guard);

        let new_id = self.insert(uri, Some(pos), meta).await?;
        let new_qvers = self.status().await.queue_version;
        let mut guard = self.state.lock().await;
        guard.shortcut = InsertShortcut {
            id: new_id,
            pos,
            qvers: new_qvers,
        };
        Ok(new_id)
    }

    async fn delete_id(&self, id: u32) -> Result<()> {
        let mut guard = self.state.lock().await;
        let before = guard.queue.len();
        guard.queue.retain(|s| s.mpd_id != Some(id));
        if guard.queue.len() != before {
            guard.status.queue_version += 1;
        }
        self.notify(&mut guard).await;
        Ok(())
    }

    async fn delete_pos_range(&self, start: u32, end: u32) -> Result<()> {
        let mut guard = self.state.lock().await;
        let start = (start as usize).min(guard.queue.len());
        let end = (end as usize).min(guard.queue.len()).max(start);
        guard.queue.drain(start..end);
        guard.status.queue_version += 1;
        self.notify(&mut guard).await;
        Ok(())
    }

    async fn clear_queue(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        guard.queue.clear();
        guard.status.queue_version += 1;
        guard.status.songpos = None;
        guard.status.songid = None;
        self.notify(&mut guard).await;
        Ok(())
    }

    async fn stat_id(&self, id: u32) -> Result<bool> {
        Ok(self.state.lock().await.queue.iter().any(|s| s.mpd_id == Some(id)))
    }

    async fn get_queue_data(&self) -> Result<Vec<SongDescriptor>> {
        Ok(self.state.lock().await.queue.clone())
    }

    async fn stat_song(&self, pos: Option<u32>, id: Option<u32>) -> Result<Option<SongDescriptor>> {
        let guard = self.state.lock().await;
        if let Some(id) = id {
            return Ok(guard.queue.iter().find(|s| s.mpd_id == Some(id)).cloned());
        }
        if let Some(pos) = pos {
            return Ok(guard.queue.get(pos as usize).cloned());
        }
        Ok(guard.status.songpos.and_then(|p| guard.queue.get(p as usize).cloned()))
    }

    async fn set_repeat(&self, on: bool) -> Result<()> {
        let mut guard = self.state.lock().await;
        guard.status.repeat = on;
        self.notify(&mut guard).await;
        Ok(())
    }

    async fn set_random(&self, on: bool) -> Result<()> {
        let mut guard = self.state.lock().await;
        guard.status.random = on;
        self.notify(&mut guard).await;
        Ok(())
    }

    async fn set_single(&self, on: bool) -> Result<()> {
        let mut guard = self.state.lock().await;
        guard.status.single = on;
        self.notify(&mut guard).await;
        Ok(())
    }

    async fn set_consume(&self, on: bool) -> Result<()> {
        let mut guard = self.state.lock().await;
        guard.status.consume = on;
        self.notify(&mut guard).await;
        Ok(())
    }

    async fn set_volume(&self, vol: i32, is_mute: bool) -> Result<()> {
        let mut guard = self.state.lock().await;
        let vol = vol.clamp(0, 100);
        if is_mute {
            if vol == 0 {
                guard.premute_volume = guard.status.volume.unwrap_or(0);
                guard.status.volume = Some(0);
            } else {
                let restored = if guard.premute_volume == 0 { 1 } else { guard.premute_volume };
                guard.status.volume = Some(restored);
                guard.premute_volume = 0;
            }
        } else {
            guard.status.volume = Some(vol);
        }
        self.notify(&mut guard).await;
        Ok(())
    }

    async fn get_volume(&self) -> Result<i32> {
        Ok(self.state.lock().await.status.volume.unwrap_or(0))
    }

    fn force_internal_vcontrol(&self) {}

    async fn save_state(&self, seek_ms: Option<u32>) -> Result<MpdState> {
        let guard = self.state.lock().await;
        let mut status = guard.status.clone();
        if let Some(ms) = seek_ms {
            status.elapsed_ms = ms;
        }
        Ok(MpdState {
            status,
            queue: guard.queue.clone(),
        })
    }

    async fn restore_state(&self, state: &MpdState) -> Result<()> {
        self.clear_queue().await?;
        for song in &state.queue {
            self.insert(&song.resource.uri, None, Some(song)).await?;
        }
        self.set_repeat(state.status.repeat).await?;
        self.set_random(state.status.random).await?;
        self.set_single(state.status.single).await?;
        self.set_consume(state.status.consume).await?;
        if let Some(vol) = state.status.volume {
            self.set_volume(vol, false).await?;
        }
        match state.status.state {
            TransportState::Playing => self.play(state.status.songpos).await,
            TransportState::Paused => self.pause(true).await,
            _ => Ok(()),
        }
    }

    async fn subscribe(&self, _mask: u32, callback: SubscriberFn) {
        self.state.lock().await.subscribers.push(callback);
    }

    fn should_exit(&self) {}

    async fn take_subscribers(&self) -> Vec<SubscriberFn> {
        std::mem::take(&mut self.state.lock().await.subscribers)
    }

    async fn adopt_subscribers(&self, subscribers: Vec<SubscriberFn>) {
        self.state.lock().await.subscribers.extend(subscribers);
    }
}

/// Helper used only by tests that need to assert [`Error::Ack`] is
/// reachable from a `Result<_, Error>` without constructing a real
/// connection.
#[cfg(test)]
pub(crate) fn fabricate_ack(msg: &str) -> Error {
    Error::Ack(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_and_play_updates_status() {
        let mpd = FakeMpd::new();
        let id = mpd.insert("http://host/a.mp3", None, None).await.unwrap();
        mpd.play_id(id).await.unwrap();
        let status = mpd.status().await;
        assert_eq!(status.songid, Some(id));
        assert!(matches!(status.state, TransportState::Playing));
    }

    #[tokio::test]
    async fn mute_round_trip_restores_exact_volume() {
        let mpd = FakeMpd::new();
        mpd.set_volume(40, false).await.unwrap();
        mpd.set_volume(0, true).await.unwrap();
        assert_eq!(mpd.get_volume().await.unwrap(), 0);
        mpd.set_volume(1, true).await.unwrap();
        assert_eq!(mpd.get_volume().await.unwrap(), 40);
    }

    #[tokio::test]
    async fn mute_from_zero_restores_to_one() {
        let mpd = FakeMpd::new();
        mpd.set_volume(0, false).await.unwrap();
        mpd.set_volume(0, true).await.unwrap();
        mpd.set_volume(1, true).await.unwrap();
        assert_eq!(mpd.get_volume().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn insert_after_id_shortcut_matches_rescan() {
        let mpd = FakeMpd::new();
        let id1 = mpd.insert("a", None, None).await.unwrap();
        let _id2 = mpd.insert_after_id("b", id1, None).await.unwrap();
        let _id3 = mpd.insert_after_id("c", id1, None).await.unwrap();
        let queue = mpd.get_queue_data().await.unwrap();
        let uris: Vec<_> = queue.iter().map(|s| s.resource.uri.clone()).collect();
        // "c" is inserted after id1 a second time; since qvers advanced each
        // insert, the shortcut only applies while unchanged, so both b and c
        // land right after a, with c ending up directly after a (most recent).
        assert_eq!(uris[0], "a");
        assert!(uris.contains(&"b".to_string()));
        assert!(uris.contains(&"c".to_string()));
    }

    #[tokio::test]
    async fn fabricated_ack_error_displays_message() {
        let err = fabricate_ack("unknown command");
        assert!(err.to_string().contains("unknown command"));
    }
}
