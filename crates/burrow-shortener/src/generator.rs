pub mod seq;

use burrow_core::ShortCode;

/// Trait for generating short codes.
///
/// Implementations are pure generators that don't interact with storage.
/// The long URL is passed in so hashing generators can derive a code from it;
/// sequential generators ignore it.
pub trait Generator: Send + Sync + 'static {
    /// Generates a short code for `url`. The code should be unique.
    fn generate(&self, url: &str) -> ShortCode;
}
