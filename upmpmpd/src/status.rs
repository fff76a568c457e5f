//! The status snapshot and its constituent value types (spec.md §3
//! "Status snapshot").

use upmpdidl::SongDescriptor;

/// Transport state as reported by MPD's `state` status field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Unknown,
    Stopped,
    Playing,
    Paused,
}

impl TransportState {
    pub(crate) fn from_mpd(s: &str) -> Self {
        match s {
            "play" => TransportState::Playing,
            "pause" => TransportState::Paused,
            "stop" => TransportState::Stopped,
            _ => TransportState::Unknown,
        }
    }
}

/// MPD protocol version, as reported in the greeting line `OK MPD x.y.z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

/// A value-type snapshot of everything the rest of the workspace needs to
/// know about MPD's current state. Replaced atomically on every refresh
/// (spec.md §3 invariant: "no half-updated record").
#[derive(Debug, Clone, Default)]
pub struct MpdStatus {
    pub version: ProtocolVersion,
    pub volume: Option<i32>,
    pub repeat: bool,
    pub random: bool,
    pub single: bool,
    pub consume: bool,
    pub queue_len: u32,
    pub queue_version: u32,
    pub state: TransportState,
    pub crossfade_secs: u32,
    pub songpos: Option<u32>,
    pub songid: Option<u32>,
    pub elapsed_ms: u32,
    pub total_ms: u32,
    pub kbit_rate: u32,
    pub sample_rate: u32,
    pub bit_depth: u32,
    pub channels: u32,
    pub current_song: Option<SongDescriptor>,
    pub next_song: Option<SongDescriptor>,
    pub error_message: Option<String>,

    /// Bumped on every status refresh; lets services detect "is this a
    /// newer observation than the one I last saw".
    pub trackcounter: u64,
    pub detailscounter: u64,
}

/// A full dump of MPD's playable state, used by `save_state`/`restore_state`
/// around songcast swaps and source (de)activation (spec.md §4.2 "State
/// transfer").
#[derive(Debug, Clone, Default)]
pub struct MpdState {
    pub status: MpdStatus,
    pub queue: Vec<SongDescriptor>,
}

/// Remembers the id/position/queue-version of the last `insert_after_id`
/// call so a follow-up call against the same id, with the queue otherwise
/// unchanged, can compute its position arithmetically instead of rescanning
/// the whole queue (spec.md §4.2 "Insertion shortcut").
#[derive(Debug, Clone, Copy, Default)]
pub struct InsertShortcut {
    pub id: u32,
    pub pos: u32,
    pub qvers: u32,
}

/// Event selection mask: which subset of MPD's idle subsystems a subscriber
/// cares about, mirroring `mpd/idle.h`'s bit values so the idle-loop's
/// wakeup reason maps directly onto it.
pub mod subs {
    pub const QUEUE: u32 = 0x4;
    pub const PLAYER: u32 = 0x8;
    pub const MIXER: u32 = 0x10;
    pub const OPTIONS: u32 = 0x40;
}
