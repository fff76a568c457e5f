//! DIDL-Lite serde structures, kept close to the subset `upmpdcli` actually
//! emits/reads (no full ContentDirectory schema): one `item` or `container`
//! per fragment, a single primary `res` and zero or more secondary ones.

use serde::{Deserialize, Serialize};

const XMLNS_DIDL: &str = "urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/";
const XMLNS_UPNP: &str = "urn:schemas-upnp-org:metadata-1-0/upnp/";
const XMLNS_DC: &str = "http://purl.org/dc/elements/1.1/";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Resource {
    #[serde(rename = "@protocolInfo")]
    pub protocol_info: String,
    #[serde(rename = "@size", skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(rename = "@bitrate", skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u32>,
    #[serde(rename = "@sampleFrequency", skip_serializing_if = "Option::is_none")]
    pub sample_frequency: Option<u32>,
    #[serde(rename = "@bitsPerSample", skip_serializing_if = "Option::is_none")]
    pub bits_per_sample: Option<u32>,
    #[serde(rename = "@nrAudioChannels", skip_serializing_if = "Option::is_none")]
    pub nr_audio_channels: Option<u32>,
    #[serde(rename = "@duration", skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(rename = "$text")]
    pub uri: String,
}

impl Resource {
    /// The mime type is the third colon-separated field of `protocolInfo`
    /// (`http-get:*:audio/mpeg:*`).
    pub fn mime(&self) -> Option<&str> {
        self.protocol_info.split(':').nth(2)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Item {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@parentID")]
    pub parent_id: String,
    #[serde(rename = "@restricted")]
    pub restricted: String,
    #[serde(rename = "dc:title")]
    pub title: String,
    #[serde(rename = "upnp:class")]
    pub class: String,
    #[serde(rename = "upnp:artist", skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(rename = "upnp:album", skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(rename = "upnp:genre", skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(
        rename = "upnp:originalTrackNumber",
        skip_serializing_if = "Option::is_none"
    )]
    pub track_number: Option<u32>,
    #[serde(rename = "res", default)]
    pub resources: Vec<Resource>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Container {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@parentID")]
    pub parent_id: String,
    #[serde(rename = "@restricted")]
    pub restricted: String,
    #[serde(rename = "@childCount", skip_serializing_if = "Option::is_none")]
    pub child_count: Option<u32>,
    #[serde(rename = "dc:title")]
    pub title: String,
    #[serde(rename = "upnp:class")]
    pub class: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename = "DIDL-Lite")]
pub struct DidlLite {
    #[serde(rename = "@xmlns")]
    pub xmlns: String,
    #[serde(rename = "@xmlns:upnp")]
    pub xmlns_upnp: String,
    #[serde(rename = "@xmlns:dc")]
    pub xmlns_dc: String,
    #[serde(rename = "item", skip_serializing_if = "Option::is_none", default)]
    pub item: Option<Item>,
    #[serde(rename = "container", skip_serializing_if = "Option::is_none", default)]
    pub container: Option<Container>,
}

impl DidlLite {
    pub fn wrapping_item(item: Item) -> Self {
        DidlLite {
            xmlns: XMLNS_DIDL.to_string(),
            xmlns_upnp: XMLNS_UPNP.to_string(),
            xmlns_dc: XMLNS_DC.to_string(),
            item: Some(item),
            container: None,
        }
    }

    pub fn wrapping_container(container: Container) -> Self {
        DidlLite {
            xmlns: XMLNS_DIDL.to_string(),
            xmlns_upnp: XMLNS_UPNP.to_string(),
            xmlns_dc: XMLNS_DC.to_string(),
            item: None,
            container: Some(container),
        }
    }
}
