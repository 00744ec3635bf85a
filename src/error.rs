use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("capture device error: {0}")]
    Capture(#[from] pcap::Error),

    #[error("query record serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bad config: {0}")]
    BadConfig(String),
}
