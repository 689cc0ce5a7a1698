use async_trait::async_trait;
use burrow_core::{
    DeletionBatch, FullUrl, NewUrl, OpContext, OwnerToken, ReadRepository, Repository, Result,
    ShortCode, StorageError, UrlRecord,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, trace, warn};

/// On-disk layout of the table file.
#[derive(Debug, Default, Deserialize)]
struct StoredTable {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    records: Vec<UrlRecord>,
}

#[derive(Serialize)]
struct TableSnapshot<'a> {
    next_id: u64,
    records: &'a [UrlRecord],
}

/// In-memory copy of the table file plus its lookup indexes.
#[derive(Debug, Default)]
struct Table {
    next_id: u64,
    records: Vec<UrlRecord>,
    by_url: HashMap<String, usize>,
    by_code: HashMap<String, Vec<usize>>,
    by_owner: HashMap<OwnerToken, Vec<usize>>,
}

impl Table {
    fn from_stored(stored: StoredTable) -> Result<Self> {
        let mut table = Table {
            next_id: stored.next_id,
            ..Table::default()
        };

        for record in stored.records {
            if table.by_url.contains_key(&record.original_url) {
                return Err(StorageError::InvalidData(format!(
                    "duplicate url in table file: {}",
                    record.original_url
                )));
            }
            let after = record.id.checked_add(1).ok_or_else(|| {
                StorageError::InvalidData(format!("record id out of range: {}", record.id))
            })?;
            table.next_id = table.next_id.max(after);
            table.push(record);
        }

        Ok(table)
    }

    fn push(&mut self, record: UrlRecord) {
        let idx = self.records.len();
        self.by_url.insert(record.original_url.clone(), idx);
        self.by_code
            .entry(record.short_code.as_str().to_owned())
            .or_default()
            .push(idx);
        self.by_owner
            .entry(record.owner.clone())
            .or_default()
            .push(idx);
        self.records.push(record);
    }

    /// Undoes the most recent [`Table::push`].
    fn pop(&mut self) {
        let Some(record) = self.records.pop() else {
            return;
        };
        self.by_url.remove(&record.original_url);
        if let Some(indexes) = self.by_code.get_mut(record.short_code.as_str()) {
            indexes.pop();
            if indexes.is_empty() {
                self.by_code.remove(record.short_code.as_str());
            }
        }
        if let Some(indexes) = self.by_owner.get_mut(&record.owner) {
            indexes.pop();
            if indexes.is_empty() {
                self.by_owner.remove(&record.owner);
            }
        }
    }

    fn resolve(&self, code: &ShortCode) -> Result<String> {
        let Some(indexes) = self.by_code.get(code.as_str()) else {
            return Err(StorageError::NotFound(code.to_string()));
        };

        indexes
            .iter()
            .map(|&idx| &self.records[idx])
            .find(|record| !record.deleted)
            .map(|record| record.original_url.clone())
            .ok_or_else(|| StorageError::Gone(code.to_string()))
    }

    fn live_by_owner(&self, owner: &OwnerToken) -> Vec<FullUrl> {
        self.by_owner
            .get(owner)
            .map(|indexes| {
                indexes
                    .iter()
                    .map(|&idx| &self.records[idx])
                    .filter(|record| !record.deleted)
                    .map(FullUrl::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Tombstones matching live records and returns their positions.
    fn tombstone(&mut self, batch: &DeletionBatch) -> Vec<usize> {
        let Some(owned) = self.by_owner.get(&batch.owner) else {
            return Vec::new();
        };
        let codes: HashSet<&str> = batch.codes.iter().map(ShortCode::as_str).collect();

        let marked: Vec<usize> = owned
            .iter()
            .copied()
            .filter(|&idx| {
                let record = &self.records[idx];
                !record.deleted && codes.contains(record.short_code.as_str())
            })
            .collect();

        for &idx in &marked {
            self.records[idx].deleted = true;
        }
        marked
    }

    fn snapshot(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&TableSnapshot {
            next_id: self.next_id,
            records: &self.records,
        })
        .map_err(|e| StorageError::InvalidData(format!("failed to encode table file: {e}")))
    }
}

/// Single-process mapping store backed by a JSON file.
///
/// The whole table is kept in memory behind an async read-write lock and
/// rewritten to disk before every mutating operation releases the write lock,
/// so readers never observe a change the file does not hold. Lookups and scans
/// share the read lock and run concurrently.
#[derive(Debug)]
pub struct FileRepository {
    path: PathBuf,
    table: RwLock<Table>,
    closed: AtomicBool,
}

impl FileRepository {
    /// Opens the table file at `path`, creating an empty one if it is missing.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let table = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Table::default(),
            Ok(bytes) => {
                let stored: StoredTable = serde_json::from_slice(&bytes).map_err(|e| {
                    StorageError::InvalidData(format!(
                        "failed to decode table file {}: {e}",
                        path.display()
                    ))
                })?;
                Table::from_stored(stored)?
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let table = Table::default();
                write_atomically(&path, &table.snapshot()?).await?;
                table
            }
            Err(err) => return Err(err.into()),
        };

        info!(
            path = %path.display(),
            records = table.records.len(),
            "opened file storage"
        );

        Ok(Self {
            path,
            table: RwLock::new(table),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Unreachable(format!(
                "file storage {} is closed",
                self.path.display()
            )));
        }
        Ok(())
    }

    async fn read(&self, ctx: &OpContext, operation: &str) -> Result<RwLockReadGuard<'_, Table>> {
        self.ensure_open()?;
        ctx.run(operation, async { Ok(self.table.read().await) })
            .await
    }

    async fn write(&self, ctx: &OpContext, operation: &str) -> Result<RwLockWriteGuard<'_, Table>> {
        self.ensure_open()?;
        ctx.run(operation, async { Ok(self.table.write().await) })
            .await
    }

    async fn persist(&self, table: &Table) -> Result<()> {
        write_atomically(&self.path, &table.snapshot()?).await
    }
}

/// Replaces `path` with `bytes` via a sibling temp file and a rename.
async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl ReadRepository for FileRepository {
    async fn lookup(&self, ctx: &OpContext, code: &ShortCode) -> Result<String> {
        let table = self.read(ctx, "lookup").await?;
        match table.resolve(code) {
            Ok(url) => {
                debug!(code = %code, url = %url, "resolved short code");
                Ok(url)
            }
            Err(err) => {
                trace!(code = %code, error = %err, "short code did not resolve");
                Err(err)
            }
        }
    }

    async fn list_by_owner(&self, ctx: &OpContext, owner: &OwnerToken) -> Result<Vec<FullUrl>> {
        let table = self.read(ctx, "list_by_owner").await?;
        let urls = table.live_by_owner(owner);
        debug!(owner = %owner, count = urls.len(), "listed urls by owner");
        Ok(urls)
    }

    async fn ping(&self) -> Result<()> {
        self.ensure_open()?;
        tokio::fs::metadata(&self.path)
            .await
            .map(|_| ())
            .map_err(|e| StorageError::Unreachable(format!("{}: {e}", self.path.display())))
    }
}

#[async_trait]
impl Repository for FileRepository {
    async fn insert(&self, ctx: &OpContext, url: NewUrl) -> Result<()> {
        let mut table = self.write(ctx, "insert").await?;

        // Checked under the write lock, so no other writer can slip in between.
        if let Some(&idx) = table.by_url.get(&url.original_url) {
            let short_code = table.records[idx].short_code.to_string();
            debug!(url = %url.original_url, existing = %short_code, "url already stored");
            return Err(StorageError::AlreadyExists {
                url: url.original_url,
                short_code,
            });
        }

        let next_id = table.next_id.checked_add(1).ok_or_else(|| {
            StorageError::InvalidData("record ids are exhausted".to_string())
        })?;
        let record = UrlRecord {
            id: table.next_id,
            owner: url.owner,
            original_url: url.original_url,
            short_code: url.short_code,
            deleted: false,
        };
        table.next_id = next_id;
        table.push(record);

        if let Err(err) = self.persist(&table).await {
            warn!(error = %err, "failed to persist insert, rolling back");
            table.pop();
            table.next_id -= 1;
            return Err(err);
        }

        if let Some(record) = table.records.last() {
            debug!(code = %record.short_code, url = %record.original_url, "stored url");
        }
        Ok(())
    }

    async fn mark_deleted(&self, batch: &DeletionBatch) -> Result<u64> {
        self.ensure_open()?;
        let mut table = self.table.write().await;

        let marked = table.tombstone(batch);
        if marked.is_empty() {
            return Ok(0);
        }

        if let Err(err) = self.persist(&table).await {
            warn!(error = %err, "failed to persist deletion, rolling back");
            for idx in marked {
                table.records[idx].deleted = false;
            }
            return Err(err);
        }

        Ok(marked.len() as u64)
    }

    async fn close(&self) {
        // Taking the write lock waits out any mutation still persisting.
        let _table = self.table.write().await;
        self.closed.store(true, Ordering::Release);
        info!(path = %self.path.display(), "file storage closed");
    }
}
