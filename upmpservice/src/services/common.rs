//! Small helpers shared by more than one service: OpenHome-style transport
//! state naming, `H:MM:SS` time formatting, and the big-endian-u32 id-array
//! encoding used by both the playlist and radio services' `IdArray`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use upmpmpd::status::TransportState;

pub fn transport_state_str(state: TransportState) -> &'static str {
    match state {
        TransportState::Playing => "Playing",
        TransportState::Paused => "Paused",
        TransportState::Stopped => "Stopped",
        TransportState::Unknown => "Stopped",
    }
}

pub fn fmt_hms(total_secs: u32) -> String {
    format!("{:01}:{:02}:{:02}", total_secs / 3600, (total_secs % 3600) / 60, total_secs % 60)
}

pub fn parse_hms(s: &str) -> Option<u32> {
    let mut parts = s.split(':').rev();
    let secs: u32 = parts.next()?.parse().ok()?;
    let mins: u32 = parts.next().map(|p| p.parse().ok()).unwrap_or(Some(0))?;
    let hours: u32 = parts.next().map(|p| p.parse().ok()).unwrap_or(Some(0))?;
    Some(hours * 3600 + mins * 60 + secs)
}

/// Base64-encode an ordered sequence of ids as big-endian `u32`s (spec.md
/// §4.4 `IdArray`, §4.9 radio channel list).
pub fn encode_id_array(ids: &[u32]) -> String {
    let mut bytes = Vec::with_capacity(ids.len() * 4);
    for id in ids {
        bytes.extend_from_slice(&id.to_be_bytes());
    }
    STANDARD.encode(bytes)
}

pub fn decode_id_array(encoded: &str) -> Vec<u32> {
    let Ok(bytes) = STANDARD.decode(encoded) else {
        return Vec::new();
    };
    bytes.chunks_exact(4).map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]])).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_array_round_trips() {
        let ids = vec![1, 2, 300, 70000];
        let encoded = encode_id_array(&ids);
        assert_eq!(decode_id_array(&encoded), ids);
    }
}
