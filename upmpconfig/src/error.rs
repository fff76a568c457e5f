//! Error kinds for the configuration store.
//!
//! These line up with the error-kind taxonomy used across the workspace
//! (transient-network / validation / state-mismatch / helper-failure /
//! configuration / persistence / fatal); a configuration store only ever
//! produces the `configuration` and `persistence` kinds.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration store is in an error state and rejects {0}")]
    StoreInError(&'static str),

    #[error("no such key {name:?} in section {section:?}")]
    NoSuchKey { name: String, section: String },

    #[error("{path:?} is not a directory")]
    NotAsDirectory { path: PathBuf },

    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to rename {tmp:?} to {path:?}: {source}")]
    Rename {
        tmp: PathBuf,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("xml serialization failed: {0}")]
    Xml(#[from] quick_xml::Error),
}
