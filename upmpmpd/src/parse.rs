//! Translating MPD reply lines into typed values.

use crate::protocol::split_kv;
use crate::status::{MpdStatus, ProtocolVersion, TransportState};
use upmpdidl::{SongDescriptor, SongResource};

fn mime_from_uri(uri: &str) -> String {
    let ext = uri.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "flac" => "audio/flac",
        "mp3" => "audio/mpeg",
        "ogg" | "oga" => "audio/ogg",
        "opus" => "audio/opus",
        "aac" | "m4a" => "audio/aac",
        "wav" => "audio/wav",
        _ => "audio/unknown",
    }
    .to_string()
}

/// Build a [`SongDescriptor`] from one `currentsong`/`playlistinfo` stanza's
/// `key: value` lines.
pub(crate) fn song_from_lines(lines: &[String]) -> Option<SongDescriptor> {
    let mut uri = None;
    let mut title = None;
    let mut artist = None;
    let mut album = None;
    let mut genre = None;
    let mut track_number = None;
    let mut duration_secs = None;
    let mut mpd_id = None;
    let mut pos = None;

    for line in lines {
        let Some((key, value)) = split_kv(line) else {
            continue;
        };
        match key {
            "file" => uri = Some(value.to_string()),
            "Title" | "Name" => title = Some(value.to_string()),
            "Artist" => artist = Some(value.to_string()),
            "Album" => album = Some(value.to_string()),
            "Genre" => genre = Some(value.to_string()),
            "Track" => track_number = value.split('/').next().and_then(|n| n.parse().ok()),
            "duration" | "Time" => duration_secs = value.parse::<f64>().ok().map(|f| f as u32),
            "Id" => mpd_id = value.parse().ok(),
            "Pos" => pos = value.parse::<u32>().ok(),
            _ => {}
        }
    }

    let uri = uri?;
    let mime = mime_from_uri(&uri);
    Some(SongDescriptor {
        id: pos.map(|p| p.to_string()).unwrap_or_default(),
        parent_id: "0".to_string(),
        title: title.unwrap_or_else(|| uri.clone()),
        artist,
        album,
        track_number,
        genre,
        duration_secs,
        resource: SongResource {
            uri: uri.clone(),
            mime,
            ..Default::default()
        },
        additional_resources: Vec::new(),
        vendor_extensions: Vec::new(),
        mpd_id,
        container: false,
    })
}

/// Split a flat `playlistinfo`/`listqueueinfo` reply (several `file:`
/// stanzas back to back) into one line-group per song.
pub(crate) fn split_song_stanzas(lines: &[String]) -> Vec<Vec<String>> {
    let mut stanzas = Vec::new();
    let mut current = Vec::new();
    for line in lines {
        if line.starts_with("file: ") && !current.is_empty() {
            stanzas.push(std::mem::take(&mut current));
        }
        current.push(line.clone());
    }
    if !current.is_empty() {
        stanzas.push(current);
    }
    stanzas
}

/// Apply a `status` reply onto an existing snapshot, replacing every field
/// the reply carries (absence of a field, e.g. `volume` when MPD is
/// stopped, leaves the prior cached value as the facade's caller decides).
pub(crate) fn apply_status_lines(status: &mut MpdStatus, lines: &[String]) {
    for line in lines {
        let Some((key, value)) = split_kv(line) else {
            continue;
        };
        match key {
            "volume" => {
                status.volume = value.parse::<i32>().ok().filter(|v| *v >= 0);
            }
            "repeat" => status.repeat = value == "1",
            "random" => status.random = value == "1",
            "single" => status.single = value == "1",
            "consume" => status.consume = value == "1",
            "playlist" => status.queue_version = value.parse().unwrap_or(status.queue_version),
            "playlistlength" => status.queue_len = value.parse().unwrap_or(status.queue_len),
            "state" => status.state = TransportState::from_mpd(value),
            "xfade" => status.crossfade_secs = value.parse().unwrap_or(0),
            "song" => status.songpos = value.parse().ok(),
            "songid" => status.songid = value.parse().ok(),
            "elapsed" => {
                status.elapsed_ms = value.parse::<f64>().map(|f| (f * 1000.0) as u32).unwrap_or(0)
            }
            "duration" => {
                status.total_ms = value.parse::<f64>().map(|f| (f * 1000.0) as u32).unwrap_or(0)
            }
            "bitrate" => status.kbit_rate = value.parse().unwrap_or(0),
            "audio" => {
                let mut parts = value.split(':');
                status.sample_rate = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
                status.bit_depth = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
                status.channels = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
            }
            "error" => status.error_message = Some(value.to_string()),
            _ => {}
        }
    }
}

pub(crate) fn parse_protocol_version(greeting: &str) -> ProtocolVersion {
    let (major, minor, patch) = crate::protocol::Connection::protocol_version(greeting);
    ProtocolVersion { major, minor, patch }
}
