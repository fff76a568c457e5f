//! # upmpdidl
//!
//! The song descriptor data model shared across the workspace, and its
//! DIDL-Lite XML encoding. A [`SongDescriptor`] is what the MPD facade and
//! the playlist/info services pass around; [`DidlLite`] is the wire form
//! stashed in `res`/`<desc>` metadata and in the metadata cache.

pub mod didl;
pub mod error;
mod protocolinfo;
mod song;

pub use didl::{Container, DidlLite, Item, Resource};
pub use error::{Error, Result};
pub use protocolinfo::ProtocolInfo;
pub use song::{SongDescriptor, SongResource};
