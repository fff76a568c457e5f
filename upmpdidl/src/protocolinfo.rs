//! The `protocolInfo` four-field string (`<network>:<vendor>:<mime>:<additional>`)
//! as used both in a `res` element's `protocolInfo` attribute and in
//! ConnectionManager's `SinkProtocolInfo`/`SourceProtocolInfo` lists: the
//! connection-manager service advertises supported formats with it, the
//! transport-compat service's `setAVTransportURI` validates an incoming
//! URI's format against the same table (spec.md §4.5, §4.6).

use std::fmt;

/// One parsed `protocolInfo` field, e.g. `http-get:*:audio/mpeg:*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolInfo {
    pub network: String,
    pub vendor: String,
    pub mime: String,
    pub additional: String,
}

impl ProtocolInfo {
    pub fn http_get(mime: impl Into<String>) -> Self {
        ProtocolInfo {
            network: "http-get".to_string(),
            vendor: "*".to_string(),
            mime: mime.into(),
            additional: "*".to_string(),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.splitn(4, ':');
        Some(ProtocolInfo {
            network: parts.next()?.to_string(),
            vendor: parts.next()?.to_string(),
            mime: parts.next()?.to_string(),
            additional: parts.next().unwrap_or("*").to_string(),
        })
    }

    /// Whether `self` (an advertised sink entry, possibly wildcarded) would
    /// accept a resource advertising `other`.
    pub fn accepts(&self, other: &ProtocolInfo) -> bool {
        field_matches(&self.network, &other.network)
            && field_matches(&self.mime, &other.mime)
    }
}

fn field_matches(advertised: &str, offered: &str) -> bool {
    advertised == "*" || advertised.eq_ignore_ascii_case(offered)
}

impl fmt::Display for ProtocolInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.network, self.vendor, self.mime, self.additional)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_renders() {
        let p = ProtocolInfo::parse("http-get:*:audio/mpeg:*").unwrap();
        assert_eq!(p.mime, "audio/mpeg");
        assert_eq!(p.to_string(), "http-get:*:audio/mpeg:*");
    }

    #[test]
    fn wildcard_sink_accepts_any_vendor() {
        let sink = ProtocolInfo::parse("http-get:*:audio/mpeg:*").unwrap();
        let offered = ProtocolInfo::parse("http-get:vendorX:audio/mpeg:DLNA.ORG_PN=MP3").unwrap();
        assert!(sink.accepts(&offered));
    }

    #[test]
    fn mismatched_mime_rejected() {
        let sink = ProtocolInfo::parse("http-get:*:audio/flac:*").unwrap();
        let offered = ProtocolInfo::parse("http-get:*:audio/mpeg:*").unwrap();
        assert!(!sink.accepts(&offered));
    }
}
