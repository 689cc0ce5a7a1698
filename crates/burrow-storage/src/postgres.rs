use async_trait::async_trait;
use burrow_core::{
    DeletionBatch, FullUrl, NewUrl, OpContext, OwnerToken, ReadRepository, Repository, Result,
    ShortCode, StorageError,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, Executor, PgPool, Row, Statement};
use std::time::Duration;
use tracing::{debug, info, trace};

const SCHEMA: &str = include_str!("../ddl/postgres/urls.sql");

const MARK_DELETED: &str = r#"
    UPDATE urls
    SET is_deleted = TRUE
    WHERE user_id = $1
      AND short_url = ANY($2)
      AND is_deleted = FALSE
"#;

/// PostgreSQL implementation of the repository contract.
///
/// Uniqueness of `url` is enforced by the table's unique constraint, so two
/// writers racing on the same URL cannot both succeed. Soft deletes flip
/// `is_deleted`; rows are never removed.
#[derive(Debug, Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a repository from an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a pool with explicit sizing and acquire timeout.
    pub async fn connect_with(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .map_err(unreachable_error)?;
        Ok(Self::new(pool))
    }

    /// Creates the `urls` table and its indexes if they do not exist yet.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        info!("urls table is ready");
        Ok(())
    }

    async fn existing_short_code(&self, url: &str) -> Result<String> {
        sqlx::query_scalar::<_, String>("SELECT short_url FROM urls WHERE url = $1")
            .bind(url)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(sqlx::error::DatabaseError::is_unique_violation)
}

fn unreachable_error(err: sqlx::Error) -> StorageError {
    StorageError::Unreachable(err.to_string())
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::DeadlineExceeded(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Configuration(_) => StorageError::Unreachable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::Scan(message),
        _ => StorageError::Execution(message),
    }
}

#[async_trait]
impl ReadRepository for PostgresRepository {
    async fn lookup(&self, ctx: &OpContext, code: &ShortCode) -> Result<String> {
        ctx.run("lookup", async {
            // A live row wins over tombstones that happen to share the code.
            let row = sqlx::query(
                r#"
                SELECT url, is_deleted
                FROM urls
                WHERE short_url = $1
                ORDER BY is_deleted ASC, id DESC
                LIMIT 1
                "#,
            )
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            let Some(row) = row else {
                trace!(code = %code, "short code not found");
                return Err(StorageError::NotFound(code.to_string()));
            };

            let url: String = row.try_get("url").map_err(map_sqlx_error)?;
            let deleted: bool = row.try_get("is_deleted").map_err(map_sqlx_error)?;
            if deleted {
                debug!(code = %code, "short code resolved to a deleted record");
                return Err(StorageError::Gone(code.to_string()));
            }

            debug!(code = %code, url = %url, "resolved short code");
            Ok(url)
        })
        .await
    }

    async fn list_by_owner(&self, ctx: &OpContext, owner: &OwnerToken) -> Result<Vec<FullUrl>> {
        ctx.run("list_by_owner", async {
            let rows = sqlx::query(
                r#"
                SELECT url, short_url
                FROM urls
                WHERE user_id = $1
                  AND is_deleted = FALSE
                ORDER BY id
                "#,
            )
            .bind(owner.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            let urls = rows
                .iter()
                .map(|row| {
                    let original_url: String = row
                        .try_get("url")
                        .map_err(|e| StorageError::Scan(e.to_string()))?;
                    let short_code: String = row
                        .try_get("short_url")
                        .map_err(|e| StorageError::Scan(e.to_string()))?;
                    Ok(FullUrl {
                        original_url,
                        short_code: ShortCode::new_unchecked(short_code),
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            debug!(owner = %owner, count = urls.len(), "listed urls by owner");
            Ok(urls)
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(unreachable_error)?;
        conn.ping().await.map_err(unreachable_error)
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn insert(&self, ctx: &OpContext, url: NewUrl) -> Result<()> {
        ctx.run("insert", async move {
            let result = sqlx::query(
                r#"
                INSERT INTO urls (user_id, url, short_url)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(url.owner.as_str())
            .bind(&url.original_url)
            .bind(url.short_code.as_str())
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => {
                    debug!(code = %url.short_code, url = %url.original_url, "stored url");
                    Ok(())
                }
                Err(err) if is_unique_violation(&err) => {
                    let short_code = self.existing_short_code(&url.original_url).await?;
                    debug!(url = %url.original_url, existing = %short_code, "url already stored");
                    Err(StorageError::AlreadyExists {
                        url: url.original_url,
                        short_code,
                    })
                }
                Err(err) => Err(map_sqlx_error(err)),
            }
        })
        .await
    }

    async fn mark_deleted(&self, batch: &DeletionBatch) -> Result<u64> {
        if batch.codes.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Execution(format!("begin transaction: {e}")))?;

        let statement = (&mut *tx)
            .prepare(MARK_DELETED)
            .await
            .map_err(|e| StorageError::Statement(e.to_string()))?;

        let result = statement
            .query()
            .bind(batch.owner.as_str())
            .bind(batch.code_strs())
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Execution(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::Execution(format!("commit transaction: {e}")))?;

        Ok(result.rows_affected())
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("postgres connection pool closed");
    }
}
