//! Core types and traits for the Burrow URL shortener.
//!
//! This crate provides the domain model shared by the storage backends and
//! the shortener service: URL records, short codes, owner tokens, the
//! operation context used for cancellation, and the repository traits.

pub mod context;
pub mod error;
pub mod owner;
pub mod record;
pub mod repository;
pub mod shortcode;

pub use context::OpContext;
pub use error::{Result, StorageError};
pub use owner::OwnerToken;
pub use record::{DeletionBatch, FullUrl, NewUrl, UrlRecord};
pub use repository::{ReadRepository, Repository};
pub use shortcode::ShortCode;
