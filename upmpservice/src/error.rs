//! Error kinds for the service layer (spec.md §7): every action handler
//! returns one of these; [`Error::protocol_code`] is how the (out-of-scope)
//! dispatch boundary would turn it into the numeric status code a control
//! point sees.

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// MPD connection dropped, a helper HTTP call timed out: already
    /// survived one reconnect attempt inside the facade.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Bad action parameter or an unsupported content format.
    #[error("invalid parameter: {0}")]
    Validation(String),

    /// setNext with an empty queue, seek while stopped, and similar.
    #[error("action not valid in current state: {0}")]
    StateMismatch(String),

    /// A helper script exited non-zero or timed out.
    #[error("helper script failed: {0}")]
    HelperFailure(String),

    /// Propagated from the MPD facade.
    #[error(transparent)]
    Mpd(#[from] upmpmpd::Error),

    /// Propagated from the configuration store.
    #[error(transparent)]
    Config(#[from] upmpconfig::Error),

    /// Propagated from DIDL-Lite (de)serialization.
    #[error(transparent)]
    Didl(#[from] upmpdidl::Error),
}

impl Error {
    /// Maps an internal error kind onto the protocol error bucket the
    /// compatibility services use (§7): negative, 0 means success.
    pub fn protocol_code(&self) -> i32 {
        match self {
            Error::Validation(_) => -402,
            Error::StateMismatch(_) => -402,
            Error::TransientNetwork(_) | Error::HelperFailure(_) | Error::Mpd(_) => -501,
            Error::Config(_) | Error::Didl(_) => -501,
        }
    }
}
