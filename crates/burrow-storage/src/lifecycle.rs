use crate::config::{Backend, StorageConfig};
use crate::file::FileRepository;
use crate::pipeline::{DeletionPool, DeletionQueue};
use crate::postgres::PostgresRepository;
use async_trait::async_trait;
use burrow_core::{
    DeletionBatch, FullUrl, NewUrl, OpContext, OwnerToken, ReadRepository, Repository, Result,
    ShortCode, StorageError,
};
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

/// A ready mapping store together with its deletion pipeline.
///
/// Request handlers call [`lookup`], [`insert`], [`list_by_owner`] and
/// [`ping`] directly; [`submit_deletion`] only enqueues. When the cancellation
/// token passed to [`Storage::init`] fires, a coordinator task tracked by the
/// caller's [`TaskTracker`] closes the queue, waits for every worker to drain
/// and exit, and only then releases the store.
///
/// [`lookup`]: ReadRepository::lookup
/// [`insert`]: Storage::insert
/// [`list_by_owner`]: ReadRepository::list_by_owner
/// [`ping`]: ReadRepository::ping
/// [`submit_deletion`]: Storage::submit_deletion
#[derive(Clone)]
pub struct Storage {
    repository: Arc<dyn Repository>,
    queue: DeletionQueue,
    failure: Arc<OnceLock<StorageError>>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("queue_closed", &self.queue.is_closed())
            .field("failure", &self.failure.get())
            .finish()
    }
}

impl Storage {
    /// Opens the configured backend, prepares its schema or file, and starts
    /// the deletion workers.
    pub async fn init(
        cancel: CancellationToken,
        tracker: &TaskTracker,
        config: StorageConfig,
    ) -> Result<Self> {
        config.validate()?;
        info!(backend = %config.backend, workers = config.workers, "initializing storage");

        let repository: Arc<dyn Repository> = match &config.backend {
            Backend::Postgres { dsn } => {
                let repository = PostgresRepository::connect_with(
                    dsn,
                    config.max_connections,
                    config.connect_timeout,
                )
                .await?;
                repository.migrate().await?;
                Arc::new(repository)
            }
            Backend::File { path } => Arc::new(FileRepository::open(path.clone()).await?),
        };

        Ok(Self::start(
            cancel,
            tracker,
            repository,
            config.workers,
            config.queue_capacity,
        ))
    }

    /// Starts the deletion pipeline on an already opened repository.
    pub fn start(
        cancel: CancellationToken,
        tracker: &TaskTracker,
        repository: Arc<dyn Repository>,
        workers: usize,
        queue_capacity: usize,
    ) -> Self {
        let (queue, rx) = DeletionQueue::channel(queue_capacity);
        let pool = DeletionPool::spawn(Arc::clone(&repository), rx, workers.max(1));
        let failure = Arc::new(OnceLock::new());

        tracker.spawn(coordinate(
            cancel,
            queue.clone(),
            pool,
            Arc::clone(&repository),
            Arc::clone(&failure),
        ));

        Self {
            repository,
            queue,
            failure,
        }
    }

    pub async fn insert(&self, ctx: &OpContext, url: NewUrl) -> Result<()> {
        self.repository.insert(ctx, url).await
    }

    /// Enqueues a deletion batch and returns without waiting for it to apply.
    pub async fn submit_deletion(&self, owner: OwnerToken, codes: Vec<ShortCode>) -> Result<()> {
        self.queue.submit(DeletionBatch::new(owner, codes)).await
    }

    /// The error that brought the deletion pool down, if one did.
    pub fn pool_failure(&self) -> Option<StorageError> {
        self.failure.get().cloned()
    }
}

#[async_trait]
impl ReadRepository for Storage {
    async fn lookup(&self, ctx: &OpContext, code: &ShortCode) -> Result<String> {
        self.repository.lookup(ctx, code).await
    }

    async fn list_by_owner(&self, ctx: &OpContext, owner: &OwnerToken) -> Result<Vec<FullUrl>> {
        self.repository.list_by_owner(ctx, owner).await
    }

    async fn ping(&self) -> Result<()> {
        self.repository.ping().await
    }
}

/// Runs the shutdown sequence once `cancel` fires or a worker fails.
///
/// A worker failure is fatal to the whole pipeline: the shared token is
/// cancelled so the rest of the process shuts down too.
async fn coordinate(
    cancel: CancellationToken,
    queue: DeletionQueue,
    mut pool: DeletionPool,
    repository: Arc<dyn Repository>,
    failure: Arc<OnceLock<StorageError>>,
) {
    let mut first_error = None;

    tokio::select! {
        () = cancel.cancelled() => {
            info!("shutdown requested, draining deletion queue");
        }
        exit = pool.next_exit() => {
            let err = match exit {
                Some((id, Err(err))) => {
                    error!(worker = id, error = %err, "deletion worker failed, stopping pipeline");
                    err
                }
                _ => StorageError::Execution("deletion worker exited unexpectedly".to_string()),
            };
            first_error = Some(err);
            cancel.cancel();
        }
    }

    queue.close();
    if let Err(err) = pool.join_all().await {
        first_error.get_or_insert(err);
    }
    info!("deletion workers stopped");

    repository.close().await;
    info!("storage released");

    if let Some(err) = first_error {
        let _ = failure.set(err);
    }
}

/// Cancels `cancel` and waits for every task tracked by `tracker`, including
/// the storage coordinator, to finish.
pub async fn shutdown(cancel: &CancellationToken, tracker: &TaskTracker) {
    cancel.cancel();
    tracker.close();
    tracker.wait().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn code(s: &str) -> ShortCode {
        ShortCode::new_unchecked(s)
    }

    async fn file_storage(dir: &TempDir) -> (Storage, CancellationToken, TaskTracker) {
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let config = StorageConfig::builder()
            .backend(Backend::File {
                path: dir.path().join("url_storage.json"),
            })
            .build();
        let storage = Storage::init(cancel.clone(), &tracker, config)
            .await
            .unwrap();
        (storage, cancel, tracker)
    }

    fn new_url(url: &str, owner: &str, short: &str) -> NewUrl {
        NewUrl {
            original_url: url.to_string(),
            owner: OwnerToken::new(owner),
            short_code: code(short),
        }
    }

    #[tokio::test]
    async fn insert_lookup_delete_scenario() {
        let dir = TempDir::new().unwrap();
        let (storage, cancel, tracker) = file_storage(&dir).await;
        let ctx = OpContext::background();

        storage
            .insert(&ctx, new_url("https://a.example", "owner-x", "abc123"))
            .await
            .unwrap();
        assert_eq!(
            storage.lookup(&ctx, &code("abc123")).await.unwrap(),
            "https://a.example"
        );

        let err = storage
            .insert(&ctx, new_url("https://a.example", "owner-y", "zzz999"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, StorageError::AlreadyExists { ref short_code, .. } if short_code == "abc123")
        );

        storage
            .submit_deletion(OwnerToken::new("owner-x"), vec![code("abc123")])
            .await
            .unwrap();
        shutdown(&cancel, &tracker).await;

        let reopened = FileRepository::open(dir.path().join("url_storage.json"))
            .await
            .unwrap();
        let err = reopened.lookup(&ctx, &code("abc123")).await.unwrap_err();
        assert!(matches!(err, StorageError::Gone(_)));
        assert!(storage.pool_failure().is_none());
    }

    #[tokio::test]
    async fn queued_batches_are_drained_before_release() {
        let dir = TempDir::new().unwrap();
        let (storage, cancel, tracker) = file_storage(&dir).await;
        let ctx = OpContext::background();

        for i in 0..50 {
            storage
                .insert(
                    &ctx,
                    new_url(&format!("https://{i}.example"), "owner-x", &format!("c{i:04}")),
                )
                .await
                .unwrap();
        }
        for i in 0..50 {
            storage
                .submit_deletion(OwnerToken::new("owner-x"), vec![code(&format!("c{i:04}"))])
                .await
                .unwrap();
        }
        shutdown(&cancel, &tracker).await;

        let reopened = FileRepository::open(dir.path().join("url_storage.json"))
            .await
            .unwrap();
        let live = reopened
            .list_by_owner(&ctx, &OwnerToken::new("owner-x"))
            .await
            .unwrap();
        assert!(live.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn submissions_racing_shutdown_neither_deadlock_nor_get_lost() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("url_storage.json");
        let repository = FileRepository::open(&path).await.unwrap();
        let ctx = OpContext::background();
        for i in 0..200 {
            repository
                .insert(
                    &ctx,
                    new_url(&format!("https://{i}.example"), "owner-x", &format!("r{i:04}")),
                )
                .await
                .unwrap();
        }

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let storage = Storage::start(cancel.clone(), &tracker, Arc::new(repository), 2, 1);

        let mut submits = tokio::task::JoinSet::new();
        for i in 0..200 {
            let storage = storage.clone();
            submits.spawn(async move {
                let short = format!("r{i:04}");
                let result = storage
                    .submit_deletion(OwnerToken::new("owner-x"), vec![code(&short)])
                    .await;
                (short, result)
            });
        }

        let (outcomes, ()) = tokio::time::timeout(Duration::from_secs(10), async {
            tokio::join!(submits.join_all(), shutdown(&cancel, &tracker))
        })
        .await
        .expect("shutdown must not deadlock against submissions");

        let reopened = FileRepository::open(&path).await.unwrap();
        assert_eq!(outcomes.len(), 200);
        for (short, result) in outcomes {
            match result {
                Ok(()) => {
                    let err = reopened.lookup(&ctx, &code(&short)).await.unwrap_err();
                    assert!(matches!(err, StorageError::Gone(_)), "{short} was lost");
                }
                Err(err) => assert_eq!(err, StorageError::QueueClosed),
            }
        }
        assert!(storage.pool_failure().is_none());
    }

    #[tokio::test]
    async fn store_is_released_after_shutdown() {
        let dir = TempDir::new().unwrap();
        let (storage, cancel, tracker) = file_storage(&dir).await;
        assert!(storage.ping().await.is_ok());

        shutdown(&cancel, &tracker).await;

        assert!(matches!(
            storage.ping().await,
            Err(StorageError::Unreachable(_))
        ));
        let err = storage
            .submit_deletion(OwnerToken::new("owner-x"), vec![code("abc123")])
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::QueueClosed);
    }

    #[tokio::test]
    async fn worker_failure_cancels_the_process_token() {
        struct FailingDeletes(FileRepository);

        #[async_trait]
        impl ReadRepository for FailingDeletes {
            async fn lookup(&self, ctx: &OpContext, code: &ShortCode) -> Result<String> {
                self.0.lookup(ctx, code).await
            }

            async fn list_by_owner(
                &self,
                ctx: &OpContext,
                owner: &OwnerToken,
            ) -> Result<Vec<FullUrl>> {
                self.0.list_by_owner(ctx, owner).await
            }

            async fn ping(&self) -> Result<()> {
                self.0.ping().await
            }
        }

        #[async_trait]
        impl Repository for FailingDeletes {
            async fn insert(&self, ctx: &OpContext, url: NewUrl) -> Result<()> {
                self.0.insert(ctx, url).await
            }

            async fn mark_deleted(&self, _batch: &DeletionBatch) -> Result<u64> {
                Err(StorageError::Statement("prepare failed".to_string()))
            }

            async fn close(&self) {
                self.0.close().await;
            }
        }

        let dir = TempDir::new().unwrap();
        let inner = FileRepository::open(dir.path().join("url_storage.json"))
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let storage = Storage::start(
            cancel.clone(),
            &tracker,
            Arc::new(FailingDeletes(inner)),
            2,
            1,
        );

        storage
            .submit_deletion(OwnerToken::new("owner-x"), vec![code("abc123")])
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), cancel.cancelled())
            .await
            .expect("worker failure should cancel the token");
        tracker.close();
        tracker.wait().await;

        assert!(matches!(
            storage.pool_failure(),
            Some(StorageError::Statement(_))
        ));
    }
}
