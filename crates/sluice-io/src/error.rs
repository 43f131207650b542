use thiserror::Error;

/// Result type local to sluice-io.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("path not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("unsupported codec: {0} (rebuild with the matching feature)")]
    CodecUnsupported(&'static str),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("checksum mismatch in {0}")]
    ChecksumMismatch(String),

    #[error("corrupt blob: {0}")]
    Corrupt(String),

    #[error("serialization error: {0}")]
    Serde(String),

    #[error("filesystem actor is gone")]
    ActorClosed,
}

impl Error {
    /// Errors a caller may reasonably retry or downgrade to a warning.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Storage(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serde(e.to_string())
    }
}
