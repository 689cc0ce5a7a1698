//! URL shortener service built on the Burrow storage layer.
//!
//! This crate provides the request-facing [`ShortenerService`] and the short
//! code [`Generator`] trait. Storage types are re-exported from
//! `burrow_storage`.

pub mod error;
pub mod generator;
pub mod service;

pub use error::ShortenerError;
pub use generator::{seq::SeqGenerator, Generator};
pub use service::{BatchItem, BatchResult, Shortened, ShortenerService, UserUrl};
