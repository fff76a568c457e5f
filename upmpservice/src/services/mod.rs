//! One module per advertised (or internal) service (spec.md §4); each owns
//! a [`crate::servicebase::ServiceBase`] rather than inheriting from one.

pub mod common;
pub mod connmgr;
pub mod credentials;
pub mod info;
pub mod playlist;
pub mod product;
pub mod radio;
pub mod songcast;
pub mod time;
pub mod transport;
pub mod volume;

pub use connmgr::ConnectionManagerService;
pub use credentials::CredentialsService;
pub use info::InfoService;
pub use playlist::PlaylistService;
pub use product::{discover_external_sources, ExternalSource, ProductService, Source};
pub use radio::{RadioChannel, RadioService};
pub use songcast::SongcastOrchestrator;
pub use time::TimeService;
pub use transport::TransportCompatService;
pub use volume::VolumeService;
