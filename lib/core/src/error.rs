use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("invalid embedding dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("feature extractor error: {0}")]
    Extractor(String),

    #[error("catalog store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("catalog store conflict: {0}")]
    StoreConflict(String),

    #[error("worker pool error: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
