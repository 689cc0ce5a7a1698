//! Persistence and deletion pipeline for the Burrow URL shortener.
//!
//! Two interchangeable mapping-store backends ([`PostgresRepository`] and
//! [`FileRepository`]) implement the [`Repository`] contract from
//! `burrow_core`. Deletions go through a [`DeletionQueue`] drained by a fixed
//! pool of workers, and [`Storage`] ties the store, the queue and the pool to
//! one cancellation token with an orderly shutdown sequence.

pub mod config;
pub mod file;
pub mod lifecycle;
pub mod pipeline;
pub mod postgres;

pub use burrow_core::{
    DeletionBatch, FullUrl, NewUrl, OpContext, OwnerToken, ReadRepository, Repository, ShortCode,
    StorageError, UrlRecord,
};
pub use config::{Backend, StorageConfig};
pub use file::FileRepository;
pub use lifecycle::{shutdown, Storage};
pub use pipeline::{DeletionPool, DeletionQueue};
pub use postgres::PostgresRepository;
