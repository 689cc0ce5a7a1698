use burrow_core::StorageError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ShortenerError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShortenerError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid short code: {0}")]
    InvalidCode(String),
    #[error("batch is empty")]
    EmptyBatch,
    #[error("short code not found: {0}")]
    NotFound(String),
    #[error("short code has been deleted: {0}")]
    Gone(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StorageError> for ShortenerError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::NotFound(code) => Self::NotFound(code),
            StorageError::Gone(code) => Self::Gone(code),
            StorageError::DeadlineExceeded(reason) => Self::Timeout(reason),
            StorageError::Unreachable(reason) => Self::Unavailable(reason),
            StorageError::QueueClosed => Self::Unavailable("deletion queue is closed".to_string()),
            other => Self::Storage(other.to_string()),
        }
    }
}
