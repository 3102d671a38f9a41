//! SQLite storage behind the hash ledger.
//!
//! One file per output tree (`<output>/.chanfetch/ledger.db` by default).
//! The schema lives in `migrations/` and is applied on every open, so an
//! older ledger file is upgraded in place.
//!
//! ```no_run
//! use chanfetch_core::{Database, HashLedger};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("downloads/.chanfetch/ledger.db")).await?;
//! let ledger = HashLedger::open(&db);
//! println!("{} digests known", ledger.len().await?);
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, instrument};

/// Pool size for a ledger file. SQLite serializes writers anyway.
const LEDGER_POOL_SIZE: u32 = 5;

/// Wait on a locked ledger before giving up with SQLITE_BUSY.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum DbError {
    #[error("ledger database error: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("ledger schema migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Pooled handle to a ledger database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the ledger at `db_path`, creating the file on first use.
    ///
    /// Connections use WAL with a busy timeout so two sessions archiving
    /// into the same tree can share the file.
    ///
    /// # Errors
    ///
    /// [`DbError::Connection`] when SQLite cannot open the file,
    /// [`DbError::Migration`] when the schema cannot be applied.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(LEDGER_POOL_SIZE)
            .connect_with(options)
            .await?;
        let db = Self::migrated(pool).await?;
        debug!("ledger database open");
        Ok(db)
    }

    /// Single-connection ledger that lives only as long as the handle.
    ///
    /// # Errors
    ///
    /// Same as [`Database::new`].
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        // More than one connection would give each its own empty database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::migrated(pool).await
    }

    async fn migrated(pool: SqlitePool) -> Result<Self, DbError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Current `journal_mode` pragma, lowercased.
    ///
    /// # Errors
    ///
    /// [`DbError::Connection`] if the pragma query fails.
    pub async fn journal_mode(&self) -> Result<String, DbError> {
        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;
        Ok(mode.to_ascii_lowercase())
    }

    /// Whether the ledger runs in WAL mode.
    ///
    /// # Errors
    ///
    /// [`DbError::Connection`] if the pragma query fails.
    pub async fn is_wal_enabled(&self) -> Result<bool, DbError> {
        Ok(self.journal_mode().await? == "wal")
    }

    /// Closes every pooled connection, checkpointing the WAL.
    #[instrument(skip(self))]
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_new_in_memory_succeeds() {
        let db = Database::new_in_memory().await;
        assert!(db.is_ok(), "Failed to create in-memory database");
    }

    #[tokio::test]
    async fn test_hash_records_table_exists() {
        let db = Database::new_in_memory().await.unwrap();
        let result = sqlx::query(
            "INSERT INTO hash_records (sha256, absolute_path, first_seen) VALUES (?, '/out/1.jpg', 0)",
        )
        .bind("a".repeat(64))
        .execute(db.pool())
        .await;
        assert!(result.is_ok(), "hash_records should exist after migration");
    }

    #[tokio::test]
    async fn test_hash_records_rejects_short_digest() {
        let db = Database::new_in_memory().await.unwrap();
        let result = sqlx::query(
            "INSERT INTO hash_records (sha256, absolute_path, first_seen) VALUES ('abc', '/out/1.jpg', 0)",
        )
        .execute(db.pool())
        .await;
        assert!(result.is_err(), "CHECK constraint should reject short digests");
    }

    #[tokio::test]
    async fn test_database_file_uses_wal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("ledger.db");

        let db = Database::new(&db_path).await.unwrap();
        assert!(db_path.exists());
        assert!(db.is_wal_enabled().await.unwrap());
        db.close().await;
    }

    #[tokio::test]
    async fn test_database_reopen_keeps_schema() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("ledger.db");

        let first = Database::new(&db_path).await.unwrap();
        first.close().await;
        let second = Database::new(&db_path).await;
        assert!(second.is_ok(), "migrations must be idempotent across reopen");
    }
}
