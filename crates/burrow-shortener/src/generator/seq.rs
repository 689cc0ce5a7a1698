use crate::error::{Result, ShortenerError};
use crate::generator::Generator;
use burrow_core::ShortCode;
use jiff::Timestamp;
use std::sync::atomic::{AtomicU64, Ordering};

/// Base58 of `u64::MAX` is 11 characters; the prefix must leave room for it.
pub const MAX_PREFIX_LEN: usize = 21;

/// Counter bodies shorter than this are left-padded with '1'.
const MIN_BODY_LEN: usize = 3;

/// Sequential short code generator.
///
/// Codes are a prefix followed by the base58 encoding of a counter. The
/// counter is seeded from the wall clock, so restarted processes do not hand
/// out codes an earlier run already used. Unique within one process only;
/// distributed deployments should give each node its own prefix.
///
/// Every generated code passes [`ShortCode::new`].
#[derive(Debug)]
pub struct SeqGenerator {
    counter: AtomicU64,
    prefix: String,
}

impl SeqGenerator {
    /// Creates a generator with the given prefix, seeded from the clock.
    pub fn with_prefix(prefix: impl Into<String>) -> Result<Self> {
        let seed = u64::try_from(Timestamp::now().as_millisecond()).unwrap_or_default();
        Self::with_offset(prefix, seed)
    }

    /// Creates a generator starting from a specific counter value.
    pub fn with_offset(prefix: impl Into<String>, offset: u64) -> Result<Self> {
        let prefix = prefix.into();
        Self::check_prefix(&prefix)?;
        Ok(Self {
            counter: AtomicU64::new(offset),
            prefix,
        })
    }

    /// Rejects prefixes that would make generated codes unresolvable.
    pub fn check_prefix(prefix: &str) -> Result<()> {
        if prefix.len() > MAX_PREFIX_LEN {
            return Err(ShortenerError::InvalidCode(format!(
                "generator prefix is longer than {} characters: '{}'",
                MAX_PREFIX_LEN, prefix
            )));
        }
        if !prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ShortenerError::InvalidCode(format!(
                "generator prefix must contain only alphanumeric characters, hyphens, or underscores: '{}'",
                prefix
            )));
        }
        Ok(())
    }
}

impl Default for SeqGenerator {
    fn default() -> Self {
        let seed = u64::try_from(Timestamp::now().as_millisecond()).unwrap_or_default();
        Self {
            counter: AtomicU64::new(seed),
            prefix: String::new(),
        }
    }
}

impl Generator for SeqGenerator {
    fn generate(&self, _url: &str) -> ShortCode {
        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        let encoded = bs58::encode(count.to_be_bytes()).into_string();
        // Leading zero bytes encode as '1'. Stripping them and padding back to
        // a fixed minimum keeps codes short, unique and at least 3 characters.
        let trimmed = encoded.trim_start_matches('1');
        let body = format!("{:1>width$}", trimmed, width = MIN_BODY_LEN);
        ShortCode::new_unchecked(format!("{}{}", self.prefix, body))
    }
}
