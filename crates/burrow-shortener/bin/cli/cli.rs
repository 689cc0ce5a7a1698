use burrow_shortener::SeqGenerator;
use burrow_storage::{Backend, StorageConfig};
use clap::{Parser, Subcommand, ValueEnum};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

pub const STORAGE_BACKEND_ENV: &str = "BURROW_STORAGE_BACKEND";
pub const DATABASE_DSN_ENV: &str = "BURROW_DATABASE_DSN";
pub const FILE_STORAGE_PATH_ENV: &str = "BURROW_FILE_STORAGE_PATH";
pub const BASE_URL_ENV: &str = "BURROW_BASE_URL";
pub const GENERATOR_PREFIX_ENV: &str = "BURROW_GENERATOR_PREFIX";
pub const OP_TIMEOUT_ENV: &str = "BURROW_OP_TIMEOUT_MS";
pub const WORKERS_ENV: &str = "BURROW_DELETION_WORKERS";

pub const DEFAULT_FILE_STORAGE_PATH: &str = "url_storage.json";
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_GENERATOR_PREFIX: &str = "";
pub const DEFAULT_OP_TIMEOUT_MS: u64 = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackendArg {
    #[value(name = "postgres")]
    Postgres,
    #[value(name = "file")]
    File,
}

impl Display for StorageBackendArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackendArg::Postgres => write!(f, "postgres"),
            StorageBackendArg::File => write!(f, "file"),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "burrow")]
pub struct CLI {
    #[arg(
        long,
        env = STORAGE_BACKEND_ENV,
        value_enum,
        default_value_t = StorageBackendArg::File
    )]
    pub storage: StorageBackendArg,

    #[arg(long, env = DATABASE_DSN_ENV, required_if_eq("storage", "postgres"))]
    pub database_dsn: Option<String>,

    #[arg(long, env = FILE_STORAGE_PATH_ENV, default_value = DEFAULT_FILE_STORAGE_PATH)]
    pub file_storage_path: PathBuf,

    #[arg(long, env = BASE_URL_ENV, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    #[arg(
        long,
        env = GENERATOR_PREFIX_ENV,
        default_value = DEFAULT_GENERATOR_PREFIX,
        value_parser = parse_generator_prefix,
    )]
    pub generator_prefix: String,

    #[arg(long, env = OP_TIMEOUT_ENV, default_value_t = DEFAULT_OP_TIMEOUT_MS)]
    pub op_timeout_ms: u64,

    #[arg(long, env = WORKERS_ENV, default_value_t = burrow_storage::config::DEFAULT_WORKERS)]
    pub workers: usize,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Shorten one or more URLs for an owner.
    Shorten {
        #[arg(long)]
        owner: String,
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Print the long URL behind a short code.
    Resolve { code: String },
    /// List an owner's live URLs.
    List {
        #[arg(long)]
        owner: String,
    },
    /// Queue short codes for deletion.
    Delete {
        #[arg(long)]
        owner: String,
        #[arg(required = true)]
        codes: Vec<String>,
    },
    /// Check that the store is reachable.
    Ping,
}

fn parse_generator_prefix(prefix: &str) -> Result<String, String> {
    SeqGenerator::check_prefix(prefix).map_err(|err| err.to_string())?;
    Ok(prefix.to_string())
}

impl CLI {
    pub fn backend(&self) -> anyhow::Result<Backend> {
        match self.storage {
            StorageBackendArg::Postgres => {
                let dsn = self.database_dsn.clone().ok_or_else(|| {
                    anyhow::anyhow!("database dsn is required when storage backend is postgres")
                })?;
                Ok(Backend::Postgres { dsn })
            }
            StorageBackendArg::File => Ok(Backend::File {
                path: self.file_storage_path.clone(),
            }),
        }
    }

    pub fn storage_config(&self) -> anyhow::Result<StorageConfig> {
        Ok(StorageConfig::builder()
            .backend(self.backend()?)
            .workers(self.workers)
            .build())
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}
