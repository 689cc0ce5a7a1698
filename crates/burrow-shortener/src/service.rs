use crate::error::{Result, ShortenerError};
use crate::generator::Generator;
use burrow_core::{NewUrl, OpContext, OwnerToken, ReadRepository, ShortCode, StorageError};
use burrow_storage::Storage;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(3);

/// Outcome of shortening one URL; both variants carry the full short URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shortened {
    /// A new mapping was stored.
    Created(String),
    /// The URL was already stored, possibly by another owner.
    Existing(String),
}

impl Shortened {
    pub fn short_url(&self) -> &str {
        match self {
            Shortened::Created(url) | Shortened::Existing(url) => url,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Shortened::Created(_))
    }
}

/// One entry of a batch shorten request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub correlation_id: String,
    pub original_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult {
    pub correlation_id: String,
    pub short_url: String,
}

/// A live mapping owned by the caller, with its full short URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserUrl {
    pub short_url: String,
    pub original_url: String,
}

/// Request-facing shortener.
///
/// Wraps a [`Storage`] and a [`Generator`]:
/// - every storage call gets a context bounded by `op_timeout` and cancelled
///   with the process-wide token
/// - duplicate URLs resolve to the existing short URL instead of failing
/// - deletions are queued and acknowledged before they are applied
#[derive(Debug, Clone)]
pub struct ShortenerService<G> {
    storage: Storage,
    generator: Arc<G>,
    base_url: String,
    cancel: CancellationToken,
    op_timeout: Duration,
}

impl<G: Generator> ShortenerService<G> {
    pub fn new(storage: Storage, generator: G, base_url: impl Into<String>) -> Self {
        Self {
            storage,
            generator: Arc::new(generator),
            base_url: base_url.into(),
            cancel: CancellationToken::new(),
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }

    /// Ties every storage call to `cancel`.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    fn context(&self) -> OpContext {
        OpContext::child(&self.cancel, self.op_timeout)
    }

    /// Validates that the URL has a scheme and a host.
    fn validate_url(url: &str) -> Result<()> {
        if url.trim().is_empty() {
            return Err(ShortenerError::InvalidUrl(
                "URL cannot be empty".to_string(),
            ));
        }

        let Some((scheme, rest)) = url.split_once("://") else {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL must have a valid scheme and host: {}",
                url
            )));
        };

        let scheme = scheme.to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL scheme must be http or https: {}",
                scheme
            )));
        }

        let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
        if host.is_empty() || host.contains(char::is_whitespace) {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL must have a valid host: {}",
                url
            )));
        }

        Ok(())
    }

    /// Stores a mapping for `url` under `owner`.
    ///
    /// A generated code that [`resolve`](Self::resolve) would reject is never
    /// stored.
    pub async fn shorten(&self, owner: &OwnerToken, url: &str) -> Result<Shortened> {
        Self::validate_url(url)?;

        let generated = self.generator.generate(url);
        let short_code = ShortCode::new(generated.as_str())
            .map_err(|err| ShortenerError::InvalidCode(err.to_string()))?;
        let new_url = NewUrl {
            original_url: url.to_string(),
            owner: owner.clone(),
            short_code: short_code.clone(),
        };

        match self.storage.insert(&self.context(), new_url).await {
            Ok(()) => {
                info!(owner = %owner, code = %short_code, "shortened url");
                Ok(Shortened::Created(short_code.to_url(&self.base_url)))
            }
            Err(StorageError::AlreadyExists { short_code, .. }) => {
                debug!(owner = %owner, code = %short_code, "url was already shortened");
                Ok(Shortened::Existing(
                    ShortCode::new_unchecked(short_code).to_url(&self.base_url),
                ))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Shortens every item in order; URLs already stored report their
    /// existing short URL.
    pub async fn shorten_batch(
        &self,
        owner: &OwnerToken,
        items: Vec<BatchItem>,
    ) -> Result<Vec<BatchResult>> {
        if items.is_empty() {
            return Err(ShortenerError::EmptyBatch);
        }
        for item in &items {
            Self::validate_url(&item.original_url)?;
        }

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let shortened = self.shorten(owner, &item.original_url).await?;
            results.push(BatchResult {
                correlation_id: item.correlation_id,
                short_url: shortened.short_url().to_string(),
            });
        }
        Ok(results)
    }

    /// Resolves a short code to its long URL.
    ///
    /// Malformed codes cannot exist in storage and report `NotFound`.
    pub async fn resolve(&self, code: &str) -> Result<String> {
        let code =
            ShortCode::new(code).map_err(|_| ShortenerError::NotFound(code.to_string()))?;
        Ok(self.storage.lookup(&self.context(), &code).await?)
    }

    /// Lists the caller's live mappings. An empty list is not an error.
    pub async fn list(&self, owner: &OwnerToken) -> Result<Vec<UserUrl>> {
        let urls = self.storage.list_by_owner(&self.context(), owner).await?;
        Ok(urls
            .into_iter()
            .map(|url| UserUrl {
                short_url: url.short_code.to_url(&self.base_url),
                original_url: url.original_url,
            })
            .collect())
    }

    /// Queues the caller's codes for deletion and returns once accepted.
    pub async fn delete(&self, owner: &OwnerToken, codes: Vec<String>) -> Result<()> {
        if codes.is_empty() {
            return Ok(());
        }
        let count = codes.len();
        let codes = codes.into_iter().map(ShortCode::new_unchecked).collect();
        self.storage.submit_deletion(owner.clone(), codes).await?;
        info!(owner = %owner, codes = count, "accepted deletion request");
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        Ok(self.storage.ping().await?)
    }
}
