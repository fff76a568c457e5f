pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read metadata cache {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write metadata cache {path}: {source}")]
    Write {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to rename {tmp} to {path}: {source}")]
    Rename {
        tmp: std::path::PathBuf,
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}
