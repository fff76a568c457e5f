pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to parse DIDL-Lite metadata: {0}")]
    Parse(#[from] quick_xml::de::DeError),

    #[error("failed to render DIDL-Lite metadata: {0}")]
    Render(#[from] quick_xml::se::SeError),

    #[error("DIDL-Lite fragment carries neither an item nor a container")]
    Empty,
}
