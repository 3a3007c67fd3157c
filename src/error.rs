use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Malformed size field: {0}")]
    MalformedSizeField(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transfer cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
