use thiserror::Error;

/// Canonical result for core.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("type mismatch: {0}")]
    Type(String),

    #[error("expression error: {0}")]
    Expr(String),

    #[error("hashing error: {0}")]
    Hash(String),

    #[error("serialization error: {0}")]
    Serde(String),

    #[error("internal invariant failed: {0}")]
    Invariant(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serde(e.to_string())
    }
}
