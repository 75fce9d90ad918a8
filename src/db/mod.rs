pub mod operations;
pub mod schema;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqlitePool, Transaction};
use thiserror::Error;

/// Handle to the aggregate table. Cheap to clone; passed explicitly to every
/// component that reads or writes aggregates.
#[derive(Clone, Debug)]
pub struct MasteryStore {
    pool: SqlitePool,
}

impl MasteryStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Private in-memory database. A single connection is kept alive for the
    /// lifetime of the pool so the data survives between queries.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        schema::bootstrap(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn acquire(&self) -> Result<PoolConnection<Sqlite>, StoreError> {
        Ok(self.pool.acquire().await?)
    }

    /// Opens a write transaction. Dropping it without `commit` discards every write.
    ///
    /// The first statement is a write so the connection holds SQLite's write
    /// lock before any read. A deferred transaction that reads first cannot
    /// upgrade once another writer commits and fails with `SQLITE_BUSY`
    /// without consulting `busy_timeout`.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(schema::TAKE_WRITE_LOCK).execute(&mut *tx).await?;
        Ok(tx)
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage failure: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("corrupt mastery row for {user_id}/{concept_id}: {reason}")]
    CorruptRow {
        user_id: String,
        concept_id: String,
        reason: String,
    },
}
