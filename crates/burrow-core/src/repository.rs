use crate::context::OpContext;
use crate::error::Result;
use crate::owner::OwnerToken;
use crate::record::{DeletionBatch, FullUrl, NewUrl};
use crate::shortcode::ShortCode;
use async_trait::async_trait;

/// The read side of the mapping store.
///
/// Request handlers that only resolve or list links depend on this trait.
#[async_trait]
pub trait ReadRepository: Send + Sync + 'static {
    /// Resolves a short code to its long URL.
    ///
    /// Returns `Err(NotFound)` if no record carries the code and `Err(Gone)`
    /// if every record carrying it has been tombstoned. The existence and
    /// deleted checks come from one consistent read.
    async fn lookup(&self, ctx: &OpContext, code: &ShortCode) -> Result<String>;

    /// Lists the live records created under `owner`.
    ///
    /// An owner with no records yields an empty vector, not an error.
    async fn list_by_owner(&self, ctx: &OpContext, owner: &OwnerToken) -> Result<Vec<FullUrl>>;

    /// Lightweight liveness probe. Returns `Err(Unreachable)` on failure.
    async fn ping(&self) -> Result<()>;
}

#[async_trait]
pub trait Repository: ReadRepository {
    /// Inserts a new mapping.
    ///
    /// The uniqueness of `original_url` is enforced by the store itself; a
    /// duplicate yields `Err(AlreadyExists)` carrying the short code of the
    /// existing record, whichever owner holds it.
    async fn insert(&self, ctx: &OpContext, url: NewUrl) -> Result<()>;

    /// Tombstones every listed code owned by `batch.owner`, atomically.
    ///
    /// Returns the number of records newly marked. Re-applying a batch is not
    /// an error. No context is taken: deletion workers are stopped by closing
    /// their queue, not by cancelling individual mutations.
    async fn mark_deleted(&self, batch: &DeletionBatch) -> Result<u64>;

    /// Releases the underlying connection or file handle.
    async fn close(&self);
}
