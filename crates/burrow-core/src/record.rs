use crate::owner::OwnerToken;
use crate::shortcode::ShortCode;
use serde::{Deserialize, Serialize};

/// A persisted URL mapping.
///
/// `original_url` is unique across the whole table, tombstoned rows included.
/// Once `deleted` is set it is never cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    /// Store-assigned surrogate key, never reused.
    pub id: u64,
    pub owner: OwnerToken,
    pub original_url: String,
    pub short_code: ShortCode,
    #[serde(default)]
    pub deleted: bool,
}

/// Payload for inserting a new mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUrl {
    pub original_url: String,
    pub owner: OwnerToken,
    pub short_code: ShortCode,
}

/// A live mapping as returned by owner-scoped scans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullUrl {
    pub original_url: String,
    pub short_code: ShortCode,
}

/// A request to tombstone a set of short codes belonging to one owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionBatch {
    pub owner: OwnerToken,
    pub codes: Vec<ShortCode>,
}

impl DeletionBatch {
    pub fn new(owner: OwnerToken, codes: Vec<ShortCode>) -> Self {
        Self { owner, codes }
    }

    /// Codes as plain strings, in submission order.
    pub fn code_strs(&self) -> Vec<String> {
        self.codes.iter().map(|c| c.as_str().to_owned()).collect()
    }
}

impl From<&UrlRecord> for FullUrl {
    fn from(record: &UrlRecord) -> Self {
        FullUrl {
            original_url: record.original_url.clone(),
            short_code: record.short_code.clone(),
        }
    }
}
