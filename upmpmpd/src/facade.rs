//! The MPD facade: spec.md §4.2. A monitor around one logical connection
//! to MPD — every public operation takes the instance lock, does its MPD
//! round-trip(s), refreshes the status snapshot and notifies subscribers,
//! then releases the lock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use upmpdidl::SongDescriptor;

use crate::error::{Error, Result};
use crate::hooks::{self, Hooks};
use crate::parse;
use crate::protocol::Connection;
use crate::status::{subs, InsertShortcut, MpdState, MpdStatus};

/// Subscriber callback: invoked with the fresh snapshot under the facade's
/// lock, so it must not call back into the facade.
pub type SubscriberFn = Arc<dyn Fn(&MpdStatus) + Send + Sync>;

struct Subscriber {
    mask: u32,
    callback: SubscriberFn,
}

/// Everything the facade needs to open a fresh connection, shared between
/// the foreground operations and the background idle/poller tasks.
#[derive(Clone)]
struct Endpoint {
    host: String,
    port: u16,
    password: String,
    timeout: Duration,
}

struct State {
    cmd_conn: Option<Connection>,
    status: MpdStatus,
    shortcut: InsertShortcut,
    premute_volume: i32,
    cached_volume: i32,
    force_internal_vcontrol: bool,
    has_addtagid: bool,
    subscribers: Vec<Subscriber>,
    exiting: bool,
}

/// Trait shared by the real facade and the test-only [`crate::fake::FakeMpd`]
/// so services under test can be driven against either.
#[async_trait]
pub trait Mpd: Send + Sync {
    async fn status(&self) -> MpdStatus;
    async fn play(&self, pos: Option<u32>) -> Result<()>;
    async fn play_id(&self, id: u32) -> Result<()>;
    async fn pause(&self, on: bool) -> Result<()>;
    async fn toggle_pause(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    async fn next(&self) -> Result<()>;
    async fn previous(&self) -> Result<()>;
    async fn seek(&self, seconds: u32) -> Result<()>;

    async fn insert(&self, uri: &str, pos: Option<u32>, meta: Option<&SongDescriptor>) -> Result<u32>;
    async fn insert_after_id(&self, uri: &str, id: u32, meta: Option<&SongDescriptor>) -> Result<u32>;
    async fn delete_id(&self, id: u32) -> Result<()>;
    async fn delete_pos_range(&self, start: u32, end: u32) -> Result<()>;
    async fn clear_queue(&self) -> Result<()>;
    async fn stat_id(&self, id: u32) -> Result<bool>;
    async fn get_queue_data(&self) -> Result<Vec<SongDescriptor>>;
    async fn stat_song(&self, pos: Option<u32>, id: Option<u32>) -> Result<Option<SongDescriptor>>;

    async fn set_repeat(&self, on: bool) -> Result<()>;
    async fn set_random(&self, on: bool) -> Result<()>;
    async fn set_single(&self, on: bool) -> Result<()>;
    async fn set_consume(&self, on: bool) -> Result<()>;

    async fn set_volume(&self, vol: i32, is_mute: bool) -> Result<()>;
    async fn get_volume(&self) -> Result<i32>;
    fn force_internal_vcontrol(&self);

    async fn save_state(&self, seek_ms: Option<u32>) -> Result<MpdState>;
    async fn restore_state(&self, state: &MpdState) -> Result<()>;

    async fn subscribe(&self, mask: u32, callback: SubscriberFn);
    fn should_exit(&self);

    /// Detaches this facade's subscriber bindings so they can be handed to
    /// another facade (spec.md §4.2 `takeEvents`, used on a songcast swap).
    async fn take_subscribers(&self) -> Vec<SubscriberFn>;
    /// Re-attaches subscriber bindings taken from another facade.
    async fn adopt_subscribers(&self, subscribers: Vec<SubscriberFn>);
}

/// Live facade talking to a real MPD server over two connections (spec.md
/// §4.2): the shared state above guards the command connection and status
/// snapshot; the idle connection and poller live in their own spawned
/// tasks and reach back in through the same `Arc<Mutex<State>>`.
pub struct MpdFacade {
    endpoint: Endpoint,
    hooks: Hooks,
    state: Arc<Mutex<State>>,
    idle_handle: Mutex<Option<JoinHandle<()>>>,
    poller_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MpdFacade {
    /// Connects and hands back an `Arc` rather than a bare `Self`: the
    /// background idle-loop task needs to call back into the facade (to
    /// start the elapsed-time poller on entering the *playing* state), so
    /// it holds its own clone of the same `Arc` the caller gets.
    pub async fn connect(host: &str, port: u16, password: &str, timeout: Duration, hooks: Hooks) -> Result<Arc<Self>> {
        let endpoint = Endpoint {
            host: host.to_string(),
            port,
            password: password.to_string(),
            timeout,
        };

        let conn = Connection::connect(&endpoint.host, endpoint.port, endpoint.timeout, &endpoint.password).await?;

        let state = Arc::new(Mutex::new(State {
            cmd_conn: Some(conn),
            status: MpdStatus::default(),
            shortcut: InsertShortcut::default(),
            premute_volume: 0,
            cached_volume: 50,
            force_internal_vcontrol: false,
            has_addtagid: false,
            subscribers: Vec::new(),
            exiting: false,
        }));

        let facade = Arc::new(MpdFacade {
            endpoint,
            hooks,
            state,
            idle_handle: Mutex::new(None),
            poller_handle: Mutex::new(None),
        });

        facade.probe_addtagid().await;
        facade.refresh_status_and_notify().await?;
        if matches!(facade.status().await.state, crate::status::TransportState::Playing) {
            facade.ensure_poller().await;
        }
        facade.spawn_idle_loop();
        Ok(facade)
    }

    async fn probe_addtagid(&self) {
        let mut guard = self.state.lock().await;
        if let Some(conn) = guard.cmd_conn.as_mut() {
            // addtagid only exists from MPD 0.19 onward; a harmless call
            // against an id that cannot exist yet either fails with
            // "unknown command" (pre-0.19) or some other ACK (command
            // recognized, argument rejected) — only the former disables it.
            match conn.command("addtagid 999999 comment upmpd-probe").await {
                Err(Error::Ack(msg)) if msg.to_ascii_lowercase().contains("unknown command") => {
                    guard.has_addtagid = false;
                }
                _ => guard.has_addtagid = true,
            }
        }
    }

    fn spawn_idle_loop(self: &Arc<Self>) {
        let facade = Arc::clone(self);
        let handle = tokio::spawn(run_idle_loop(facade));
        // can't await self.idle_handle lock in a non-async fn; store via
        // try_lock since nothing else holds it this early.
        if let Ok(mut guard) = self.idle_handle.try_lock() {
            *guard = Some(handle);
        }
    }

    /// Send one command, reconnecting once transparently on I/O failure
    /// (spec.md §4.2 "On any command error the facade attempts one
    /// reconnect").
    async fn run_command(&self, line: String) -> Result<Vec<String>> {
        let mut guard = self.state.lock().await;
        ensure_conn(&mut guard, &self.endpoint).await?;
        let result = guard.cmd_conn.as_mut().expect("just ensured").command(&line).await;
        match result {
            Ok(lines) => Ok(lines),
            Err(Error::Io(_)) | Err(Error::ConnectionClosed) | Err(Error::Timeout(_)) => {
                warn!("MPD command connection error on `{line}`, reconnecting once");
                guard.cmd_conn = None;
                ensure_conn(&mut guard, &self.endpoint).await?;
                guard.cmd_conn.as_mut().expect("just ensured").command(&line).await
            }
            Err(e) => Err(e),
        }
    }

    async fn refresh_status_and_notify(&self) -> Result<()> {
        let status_lines = self.run_command("status".to_string()).await?;
        let song_lines = self.run_command("currentsong".to_string()).await?;

        let mut guard = self.state.lock().await;
        guard.status.trackcounter += 1;
        parse::apply_status_lines(&mut guard.status, &status_lines);
        guard.status.current_song = parse::song_from_lines(&song_lines);
        guard.status.detailscounter += 1;

        let snapshot = guard.status.clone();
        for sub in &guard.subscribers {
            (sub.callback)(&snapshot);
        }
        Ok(())
    }

    pub async fn has_addtagid(&self) -> bool {
        self.state.lock().await.has_addtagid
    }
}

async fn ensure_conn(state: &mut State, endpoint: &Endpoint) -> Result<()> {
    if state.cmd_conn.is_some() {
        return Ok(());
    }
    let conn = Connection::connect(&endpoint.host, endpoint.port, endpoint.timeout, &endpoint.password).await?;
    state.cmd_conn = Some(conn);
    Ok(())
}

async fn run_idle_loop(facade: Arc<MpdFacade>) {
    let endpoint = facade.endpoint.clone();
    loop {
        let mut conn = match Connection::connect(&endpoint.host, endpoint.port, endpoint.timeout, &endpoint.password).await {
            Ok(c) => c,
            Err(e) => {
                warn!("MPD idle connection failed: {e}, retrying in 2s");
                tokio::time::sleep(Duration::from_secs(2)).await;
                continue;
            }
        };

        loop {
            {
                let guard = facade.state.lock().await;
                if guard.exiting {
                    return;
                }
            }
            match conn.idle("player mixer options playlist").await {
                Ok(changed) if changed.is_empty() => continue,
                Ok(_changed) => {
                    let mut guard = facade.state.lock().await;
                    let mut now_playing = false;
                    if let Some(cmd_conn) = guard.cmd_conn.as_mut() {
                        let status_lines = cmd_conn.command("status").await;
                        let song_lines = cmd_conn.command("currentsong").await;
                        if let (Ok(status_lines), Ok(song_lines)) = (status_lines, song_lines) {
                            guard.status.trackcounter += 1;
                            parse::apply_status_lines(&mut guard.status, &status_lines);
                            guard.status.current_song = parse::song_from_lines(&song_lines);
                            guard.status.detailscounter += 1;
                            now_playing = matches!(guard.status.state, crate::status::TransportState::Playing);
                            let snapshot = guard.status.clone();
                            for sub in &guard.subscribers {
                                (sub.callback)(&snapshot);
                            }
                        }
                    }
                    drop(guard);
                    // spec.md §4.2/§5: the once-a-second elapsed-time poller
                    // only needs to run while playing; (re)start it on every
                    // transition into that state, `ensure_poller` itself is
                    // idempotent against an already-running one.
                    if now_playing {
                        facade.ensure_poller().await;
                    }
                }
                Err(e) => {
                    debug!("MPD idle connection dropped: {e}");
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl Mpd for MpdFacade {
    async fn status(&self) -> MpdStatus {
        self.state.lock().await.status.clone()
    }

    async fn play(&self, pos: Option<u32>) -> Result<()> {
        let cmd = match pos {
            Some(p) => format!("play {p}"),
            None => "play".to_string(),
        };
        self.run_command(cmd).await?;
        hooks::run_hook(&self.hooks.on_play, "on_play").await;
        self.refresh_status_and_notify().await
    }

    async fn play_id(&self, id: u32) -> Result<()> {
        self.run_command(format!("playid {id}")).await?;
        hooks::run_hook(&self.hooks.on_play, "on_play").await;
        self.refresh_status_and_notify().await
    }

    async fn pause(&self, on: bool) -> Result<()> {
        self.run_command(format!("pause {}", if on { 1 } else { 0 })).await?;
        if on {
            hooks::run_hook(&self.hooks.on_pause, "on_pause").await;
        }
        self.refresh_status_and_notify().await
    }

    async fn toggle_pause(&self) -> Result<()> {
        let playing = matches!(self.status().await.state, crate::status::TransportState::Playing);
        self.pause(playing).await
    }

    async fn stop(&self) -> Result<()> {
        self.run_command("stop".to_string()).await?;
        hooks::run_hook(&self.hooks.on_stop, "on_stop").await;
        self.refresh_status_and_notify().await
    }

    async fn next(&self) -> Result<()> {
        self.run_command("next".to_string()).await?;
        self.refresh_status_and_notify().await
    }

    async fn previous(&self) -> Result<()> {
        self.run_command("previous".to_string()).await?;
        self.refresh_status_and_notify().await
    }

    async fn seek(&self, seconds: u32) -> Result<()> {
        self.run_command(format!("seekcur {seconds}")).await?;
        self.refresh_status_and_notify().await
    }

    async fn insert(&self, uri: &str, pos: Option<u32>, meta: Option<&SongDescriptor>) -> Result<u32> {
        let cmd = match pos {
            Some(p) => format!("addid \"{uri}\" {p}"),
            None => format!("addid \"{uri}\""),
        };
        let lines = self.run_command(cmd).await?;
        let id: u32 = lines
            .first()
            .and_then(|l| l.strip_prefix("Id: "))
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| Error::Protocol("addid reply missing Id".to_string()))?;

        if let Some(meta) = meta {
            self.write_metadata_tags(id, meta).await;
        }
        self.refresh_status_and_notify().await?;
        Ok(id)
    }

    async fn insert_after_id(&self, uri: &str, id: u32, meta: Option<&SongDescriptor>) -> Result<u32> {
        let qvers = self.status().await.queue_version;
        let shortcut = self.state.lock().await.shortcut;

        let pos = if shortcut.id == id && shortcut.qvers == qvers {
            shortcut.pos + 1
        } else {
            let lines = self.run_command("playlistinfo".to_string()).await?;
            let stanzas = parse::split_song_stanzas(&lines);
            stanzas
                .iter()
                .enumerate()
                .find_map(|(i, stanza)| {
                    stanza
                        .iter()
                        .find(|l| l.starts_with("Id: "))
                        .and_then(|l| l.strip_prefix("Id: "))
                        .and_then(|v| v.parse::<u32>().ok())
                        .filter(|found| *found == id)
                        .map(|_| i as u32 + 1)
                })
                .unwrap_or(0)
        };

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
        self.run_command(format!("deleteid {id}")).await?;
        self.refresh_status_and_notify().await
    }

    async fn delete_pos_range(&self, start: u32, end: u32) -> Result<()> {
        self.run_command(format!("delete {start}:{end}")).await?;
        self.refresh_status_and_notify().await
    }

    async fn clear_queue(&self) -> Result<()> {
        self.run_command("clear".to_string()).await?;
        self.refresh_status_and_notify().await
    }

    async fn stat_id(&self, id: u32) -> Result<bool> {
        match self.run_command(format!("playlistid {id}")).await {
            Ok(lines) => Ok(!lines.is_empty()),
            Err(Error::Ack(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get_queue_data(&self) -> Result<Vec<SongDescriptor>> {
        let lines = self.run_command("playlistinfo".to_string()).await?;
        Ok(parse::split_song_stanzas(&lines)
            .iter()
            .filter_map(|s| parse::song_from_lines(s))
            .collect())
    }

    async fn stat_song(&self, pos: Option<u32>, id: Option<u32>) -> Result<Option<SongDescriptor>> {
        let cmd = match (pos, id) {
            (_, Some(id)) => format!("playlistid {id}"),
            (Some(pos), None) => format!("playlistinfo {pos}"),
            (None, None) => "currentsong".to_string(),
        };
        let lines = self.run_command(cmd).await?;
        Ok(parse::song_from_lines(&lines))
    }

    async fn set_repeat(&self, on: bool) -> Result<()> {
        self.run_command(format!("repeat {}", on as u8)).await?;
        self.refresh_status_and_notify().await
    }

    async fn set_random(&self, on: bool) -> Result<()> {
        self.run_command(format!("random {}", on as u8)).await?;
        self.refresh_status_and_notify().await
    }

    async fn set_single(&self, on: bool) -> Result<()> {
        self.run_command(format!("single {}", on as u8)).await?;
        self.refresh_status_and_notify().await
    }

    async fn set_consume(&self, on: bool) -> Result<()> {
        self.run_command(format!("consume {}", on as u8)).await?;
        self.refresh_status_and_notify().await
    }

    async fn set_volume(&self, vol: i32, is_mute: bool) -> Result<()> {
        let vol = vol.clamp(0, 100);
        let use_external = self.hooks.external_volume_control && !self.state.lock().await.force_internal_vcontrol;

        if is_mute {
            let mut guard = self.state.lock().await;
            if vol == 0 {
                guard.premute_volume = guard.cached_volume;
            } else {
                let restored = if guard.premute_volume == 0 { 1 } else { guard.premute_volume };
                guard.cached_volume = restored;
                drop(guard);
                return self.apply_volume(restored, use_external).await;
            }
        }

        self.apply_volume(vol, use_external).await
    }

    async fn get_volume(&self) -> Result<i32> {
        let use_external = self.hooks.external_volume_control && !self.state.lock().await.force_internal_vcontrol;
        if use_external {
            if let Some(cmd) = &self.hooks.get_external_volume {
                if let Some(v) = hooks::read_external_volume(cmd).await {
                    self.state.lock().await.cached_volume = v;
                    return Ok(v);
                }
            }
        }
        Ok(self.status().await.volume.unwrap_or(self.state.lock().await.cached_volume))
    }

    fn force_internal_vcontrol(&self) {
        if let Ok(mut guard) = self.state.try_lock() {
            guard.force_internal_vcontrol = true;
        }
    }

    async fn save_state(&self, seek_ms: Option<u32>) -> Result<MpdState> {
        let mut status = self.status().await;
        if let Some(ms) = seek_ms {
            status.elapsed_ms = ms;
        }
        let queue = self.get_queue_data().await?;
        Ok(MpdState { status, queue })
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
        self.set_volume(state.status.volume.unwrap_or(50), false).await?;
        if let Some(pos) = state.status.songpos {
            self.play(Some(pos)).await?;
            self.seek(state.status.elapsed_ms / 1000).await?;
        }
        match state.status.state {
            crate::status::TransportState::Playing => self.play(None).await,
            crate::status::TransportState::Paused => self.pause(true).await,
            _ => Ok(()),
        }
    }

    async fn subscribe(&self, mask: u32, callback: SubscriberFn) {
        self.state.lock().await.subscribers.push(Subscriber { mask, callback });
    }

    fn should_exit(&self) {
        if let Ok(mut guard) = self.state.try_lock() {
            guard.exiting = true;
        }
    }

    async fn take_subscribers(&self) -> Vec<SubscriberFn> {
        std::mem::take(&mut self.state.lock().await.subscribers).into_iter().map(|s| s.callback).collect()
    }

    async fn adopt_subscribers(&self, subscribers: Vec<SubscriberFn>) {
        let mut guard = self.state.lock().await;
        guard.subscribers.extend(subscribers.into_iter().map(|callback| Subscriber { mask: !0, callback }));
    }
}

impl MpdFacade {
    async fn apply_volume(&self, vol: i32, use_external: bool) -> Result<()> {
        if use_external {
            hooks::run_volume_change_hook(&self.hooks.on_volume_change, vol).await;
        } else {
            self.run_command(format!("setvol {vol}")).await?;
        }
        self.state.lock().await.cached_volume = vol;
        self.refresh_status_and_notify().await
    }

    async fn write_metadata_tags(&self, id: u32, meta: &SongDescriptor) {
        if !self.state.lock().await.has_addtagid {
            return;
        }
        let tags: [(&str, &Option<String>); 3] = [
            ("artist", &meta.artist),
            ("album", &meta.album),
            ("genre", &meta.genre),
        ];
        for (tag, value) in tags {
            if let Some(value) = value {
                let _ = self.run_command(format!("addtagid {id} {tag} \"{value}\"")).await;
            }
        }
        let _ = self.run_command(format!("addtagid {id} title \"{}\"", meta.title)).await;
    }

    /// Start the one-second elapsed-time poller while playing; it stops
    /// itself once the status leaves the *playing* state (spec.md §4.2).
    pub async fn ensure_poller(self: &Arc<Self>) {
        let mut guard = self.poller_handle.lock().await;
        if guard.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }
        let this = Arc::clone(self);
        *guard = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let playing = matches!(this.status().await.state, crate::status::TransportState::Playing);
                if !playing {
                    return;
                }
                if this.refresh_status_and_notify().await.is_err() {
                    return;
                }
            }
        }));
    }
}

pub const EVENT_SUBS: [u32; 4] = [subs::QUEUE, subs::PLAYER, subs::MIXER, subs::OPTIONS];
