use burrow_core::{Result, StorageError};
use std::fmt::Display;
use std::path::PathBuf;
use std::time::Duration;
use typed_builder::TypedBuilder;

/// Number of deletion workers started at initialization.
pub const DEFAULT_WORKERS: usize = 8;

/// Smallest buffer tokio channels accept; senders park until a worker is free.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Which mapping store to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Transactional PostgreSQL store, usable by several processes at once.
    Postgres { dsn: String },
    /// Single-process JSON table file.
    File { path: PathBuf },
}

impl Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Postgres { .. } => write!(f, "postgres"),
            Backend::File { path } => write!(f, "file({})", path.display()),
        }
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct StorageConfig {
    pub backend: Backend,
    #[builder(default = DEFAULT_WORKERS)]
    pub workers: usize,
    #[builder(default = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,
    #[builder(default = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: u32,
    #[builder(default = DEFAULT_CONNECT_TIMEOUT)]
    pub connect_timeout: Duration,
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(StorageError::Config(
                "at least one deletion worker is required".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(StorageError::Config(
                "deletion queue capacity must be at least 1".to_string(),
            ));
        }
        match &self.backend {
            Backend::Postgres { dsn } if dsn.trim().is_empty() => Err(StorageError::Config(
                "postgres backend requires a connection string".to_string(),
            )),
            Backend::File { path } if path.as_os_str().is_empty() => Err(StorageError::Config(
                "file backend requires a storage path".to_string(),
            )),
            _ => Ok(()),
        }
    }
}
