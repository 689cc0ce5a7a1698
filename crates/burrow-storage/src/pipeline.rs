use burrow_core::{DeletionBatch, Repository, Result, StorageError};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<DeletionBatch>>>;

/// Producer side of the deletion hand-off.
///
/// Cloning yields another handle onto the same queue. Once [`close`] has been
/// called, new submissions fail with [`StorageError::QueueClosed`]; sends that
/// were already in flight still reach a worker.
///
/// [`close`]: DeletionQueue::close
#[derive(Debug, Clone)]
pub struct DeletionQueue {
    tx: Arc<Mutex<Option<mpsc::Sender<DeletionBatch>>>>,
}

impl DeletionQueue {
    /// Creates a queue holding at most `capacity` batches that no worker has
    /// picked up yet.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DeletionBatch>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let queue = Self {
            tx: Arc::new(Mutex::new(Some(tx))),
        };
        (queue, rx)
    }

    /// Hands a batch to the worker pool.
    ///
    /// A batch is accepted once it sits in the channel buffer, which can be
    /// before any worker has received it. The call parks only while the buffer
    /// is full, and never waits for the deletion itself to be applied. Accepted
    /// batches are still applied if the queue is closed afterwards.
    pub async fn submit(&self, batch: DeletionBatch) -> Result<()> {
        let Some(tx) = self.tx.lock().clone() else {
            return Err(StorageError::QueueClosed);
        };

        let owner = batch.owner.clone();
        let count = batch.codes.len();
        tx.send(batch)
            .await
            .map_err(|_| StorageError::QueueClosed)?;
        debug!(owner = %owner, codes = count, "queued deletion batch");
        Ok(())
    }

    /// Stops accepting batches. Workers drain what is already queued and exit.
    pub fn close(&self) {
        if self.tx.lock().take().is_some() {
            debug!("deletion queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }
}

/// Fixed set of workers applying queued deletion batches.
///
/// Each worker pulls one batch at a time and applies it in its own
/// transaction. A worker returns an error on the first failed batch and stops.
#[derive(Debug)]
pub struct DeletionPool {
    workers: JoinSet<(usize, Result<()>)>,
}

impl DeletionPool {
    /// Spawns `workers` tasks draining `rx` into `repository`.
    pub fn spawn(
        repository: Arc<dyn Repository>,
        rx: mpsc::Receiver<DeletionBatch>,
        workers: usize,
    ) -> Self {
        let rx: SharedReceiver = Arc::new(tokio::sync::Mutex::new(rx));
        let mut set = JoinSet::new();

        for id in 0..workers {
            let repository = Arc::clone(&repository);
            let rx = Arc::clone(&rx);
            set.spawn(async move { (id, run_worker(id, repository, rx).await) });
        }

        info!(workers, "deletion workers started");
        Self { workers: set }
    }

    /// Number of workers still running.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Waits for the next worker to exit. Returns `None` once all have exited.
    pub async fn next_exit(&mut self) -> Option<(usize, Result<()>)> {
        let joined = self.workers.join_next().await?;
        Some(joined.unwrap_or_else(|err| {
            (
                usize::MAX,
                Err(StorageError::Execution(format!("deletion worker panicked: {err}"))),
            )
        }))
    }

    /// Waits for every remaining worker and returns the first failure, if any.
    pub async fn join_all(&mut self) -> Result<()> {
        let mut first_error = None;
        while let Some((id, result)) = self.next_exit().await {
            if let Err(err) = result {
                error!(worker = id, error = %err, "deletion worker failed");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

async fn run_worker(id: usize, repository: Arc<dyn Repository>, rx: SharedReceiver) -> Result<()> {
    loop {
        // Only the worker holding the lock waits on the channel; a batch is
        // therefore delivered to exactly one worker.
        let next = { rx.lock().await.recv().await };
        let Some(batch) = next else {
            break;
        };

        let marked = repository.mark_deleted(&batch).await?;
        debug!(
            worker = id,
            owner = %batch.owner,
            requested = batch.codes.len(),
            marked,
            "applied deletion batch"
        );
    }

    debug!(worker = id, "deletion worker stopped");
    Ok(())
}
