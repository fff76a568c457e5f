//! # upmpservice
//!
//! The protocol state machines bridging upmpd-rs to MPD (spec.md §4):
//! Playlist, Radio, Product/source-select, Songcast, Credentials,
//! ConnectionManager, Info, Time, VolumeCompat and the transport-compat
//! service, plus [`device`] which assembles them into one root device.
//!
//! Every service composes a [`servicebase::ServiceBase`] rather than
//! inheriting from a common base class (spec.md §9 "Deep inheritance /
//! dynamic dispatch"), and reaches shared state through one
//! [`context::AppContext`] handed to every constructor.

pub mod context;
pub mod device;
pub mod error;
pub mod eventsink;
pub mod servicebase;
pub mod services;

pub use context::AppContext;
pub use device::Device;
pub use error::{Error, Result};
pub use eventsink::{EventSink, LogEventSink, MemoryEventSink};
pub use servicebase::{ServiceBase, StateMap};
