//! The song descriptor data model from spec.md §3, and its conversion to
//! and from a DIDL-Lite fragment (the metadata string carried in the
//! metadata cache and on the wire).

use crate::didl::{Container, DidlLite, Item, Resource};
use crate::error::{Error, Result};

/// One playable resource: uri plus its format description.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SongResource {
    pub uri: String,
    pub mime: String,
    pub size: Option<u64>,
    pub bitrate: Option<u32>,
    pub sample_rate: Option<u32>,
    pub bits_per_sample: Option<u32>,
    pub channels: Option<u32>,
}

impl SongResource {
    pub fn protocol_info(&self) -> String {
        format!("http-get:*:{}:*", self.mime)
    }

    fn to_didl(&self, duration_secs: Option<u32>) -> Resource {
        Resource {
            protocol_info: self.protocol_info(),
            size: self.size,
            bitrate: self.bitrate,
            sample_frequency: self.sample_rate,
            bits_per_sample: self.bits_per_sample,
            nr_audio_channels: self.channels,
            duration: duration_secs.map(format_duration),
            uri: self.uri.clone(),
        }
    }

    fn from_didl(r: &Resource) -> Self {
        SongResource {
            uri: r.uri.clone(),
            mime: r.mime().unwrap_or_default().to_string(),
            size: r.size,
            bitrate: r.bitrate,
            sample_rate: r.sample_frequency,
            bits_per_sample: r.bits_per_sample,
            channels: r.nr_audio_channels,
        }
    }
}

/// A playable-item or container descriptor, spec.md §3.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SongDescriptor {
    pub id: String,
    pub parent_id: String,
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub track_number: Option<u32>,
    pub genre: Option<String>,
    pub duration_secs: Option<u32>,
    pub resource: SongResource,
    pub additional_resources: Vec<SongResource>,
    /// Raw `<desc>`-style vendor extension fragments, passed through
    /// verbatim on render (not modeled structurally).
    pub vendor_extensions: Vec<String>,
    /// The id MPD assigned this entry in its queue, when known.
    pub mpd_id: Option<u32>,
    pub container: bool,
}

fn format_duration(secs: u32) -> String {
    format!("{:01}:{:02}:{:02}.000", secs / 3600, (secs % 3600) / 60, secs % 60)
}

impl SongDescriptor {
    pub fn class(&self) -> &'static str {
        if self.container {
            "object.container"
        } else {
            "object.item.audioItem.musicTrack"
        }
    }

    /// Render as a complete DIDL-Lite XML fragment.
    pub fn to_didl_string(&self) -> Result<String> {
        let base = if self.container {
            let didl = DidlLite::wrapping_container(Container {
                id: self.id.clone(),
                parent_id: self.parent_id.clone(),
                restricted: "1".to_string(),
                child_count: None,
                title: self.title.clone(),
                class: self.class().to_string(),
            });
            quick_xml::se::to_string(&didl)?
        } else {
            let mut resources = vec![self.resource.to_didl(self.duration_secs)];
            resources.extend(self.additional_resources.iter().map(|r| r.to_didl(self.duration_secs)));
            let didl = DidlLite::wrapping_item(Item {
                id: self.id.clone(),
                parent_id: self.parent_id.clone(),
                restricted: "1".to_string(),
                title: self.title.clone(),
                class: self.class().to_string(),
                artist: self.artist.clone(),
                album: self.album.clone(),
                genre: self.genre.clone(),
                track_number: self.track_number,
                resources,
            });
            quick_xml::se::to_string(&didl)?
        };
        if self.vendor_extensions.is_empty() {
            return Ok(base);
        }
        let close_tag = if self.container { "</container>" } else { "</item>" };
        let extra: String = self.vendor_extensions.join("");
        Ok(base.replacen(close_tag, &format!("{extra}{close_tag}"), 1))
    }

    /// Parse a DIDL-Lite fragment back into a descriptor.
    pub fn from_didl_string(xml: &str) -> Result<Self> {
        let didl: DidlLite = quick_xml::de::from_str(xml)?;
        if let Some(item) = didl.item {
            let mut resources = item.resources.iter();
            let primary = resources.next().map(SongResource::from_didl).unwrap_or_default();
            let additional = resources.map(SongResource::from_didl).collect();
            Ok(SongDescriptor {
                id: item.id,
                parent_id: item.parent_id,
                title: item.title,
                artist: item.artist,
                album: item.album,
                track_number: item.track_number,
                genre: item.genre,
                duration_secs: None,
                resource: primary,
                additional_resources: additional,
                vendor_extensions: Vec::new(),
                mpd_id: None,
                container: false,
            })
        } else if let Some(container) = didl.container {
            Ok(SongDescriptor {
                id: container.id,
                parent_id: container.parent_id,
                title: container.title,
                container: true,
                ..Default::default()
            })
        } else {
            Err(Error::Empty)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_item_through_didl() {
        let song = SongDescriptor {
            id: "1".into(),
            parent_id: "0".into(),
            title: "Test Track".into(),
            artist: Some("Test Artist".into()),
            album: Some("Test Album".into()),
            track_number: Some(3),
            genre: None,
            duration_secs: Some(185),
            resource: SongResource {
                uri: "http://host/a.mp3".into(),
                mime: "audio/mpeg".into(),
                ..Default::default()
            },
            additional_resources: Vec::new(),
            vendor_extensions: Vec::new(),
            mpd_id: Some(42),
            container: false,
        };
        let xml = song.to_didl_string().unwrap();
        assert!(xml.contains("Test Track"));
        assert!(xml.contains("http-get:*:audio/mpeg:*"));
        let back = SongDescriptor::from_didl_string(&xml).unwrap();
        assert_eq!(back.title, "Test Track");
        assert_eq!(back.artist.as_deref(), Some("Test Artist"));
        assert_eq!(back.resource.uri, "http://host/a.mp3");
        assert_eq!(back.resource.mime, "audio/mpeg");
    }
}
