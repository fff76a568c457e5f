pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("MPD connection error: {0}")]
    Connect(#[source] std::io::Error),

    #[error("MPD I/O error: {0}")]
    Io(#[source] std::io::Error),

    #[error("MPD rejected command: {0}")]
    Ack(String),

    #[error("MPD connection closed unexpectedly")]
    ConnectionClosed,

    #[error("MPD reply did not match the expected shape: {0}")]
    Protocol(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}
