use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("short code not found: {0}")]
    NotFound(String),
    #[error("short code has been deleted: {0}")]
    Gone(String),
    #[error("url already exists: {url} (short code {short_code})")]
    AlreadyExists { url: String, short_code: String },
    #[error("storage operation deadline exceeded: {0}")]
    DeadlineExceeded(String),
    #[error("failed to prepare statement: {0}")]
    Statement(String),
    #[error("failed to execute statement: {0}")]
    Execution(String),
    #[error("failed to scan result row: {0}")]
    Scan(String),
    #[error("storage backend unreachable: {0}")]
    Unreachable(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
    #[error("storage file i/o failed: {0}")]
    Io(String),
    #[error("deletion queue is closed")]
    QueueClosed,
    #[error("invalid storage configuration: {0}")]
    Config(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}
