use thiserror::Error;

/// type alias for all operations in this crate that could fail with an [`AviaryError`]
pub type Result<T> = std::result::Result<T, AviaryError>;

/// The error variants used throughout the aviary server and client.
#[derive(Debug, Error)]
pub enum AviaryError {
    /// a bird or sighting with the same key already exists in the store
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// the referenced bird does not exist in the store
    #[error("not found: {0}")]
    NotFound(String),

    /// a frame payload, persisted line or name pattern could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// a socket read or write failed
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// an invalid port, data directory or worker count was given at startup
    #[error("config error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for AviaryError {
    fn from(e: serde_json::Error) -> Self {
        AviaryError::Decode(e.to_string())
    }
}

impl From<regex::Error> for AviaryError {
    fn from(e: regex::Error) -> Self {
        AviaryError::Decode(format!("invalid name pattern: {}", e))
    }
}
