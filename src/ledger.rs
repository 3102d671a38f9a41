//! Persistent content-hash ledger for cross-session deduplication.
//!
//! Every archived file is recorded by its SHA-256 digest. Before a finished
//! download is moved into place, the runner asks the ledger whether the
//! digest is already known; [`HashLedger::check_and_record`] performs that
//! check and the insert under one process-wide async mutex, so two workers
//! finishing identical content at the same moment cannot both win.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use sqlx::FromRow;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::db::Database;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Database operation failed.
    #[error("ledger database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The digest is not 64 lowercase hex characters.
    #[error("invalid SHA-256 digest '{0}'")]
    InvalidDigest(String),
}

impl LedgerError {
    /// Whether SQLite reported the database as busy or locked.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(db_error)) => {
                matches!(db_error.code().as_deref(), Some("5" | "6"))
                    || db_error.message().contains("database is locked")
            }
            _ => false,
        }
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// One archived file.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct HashRecord {
    /// Lowercase hex SHA-256 of the file content.
    pub sha256: String,
    /// Where the content was first written.
    pub absolute_path: String,
    /// Unix seconds of the first recording.
    pub first_seen: i64,
}

impl HashRecord {
    #[must_use]
    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.absolute_path)
    }
}

/// Result of the atomic check-then-record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerDecision {
    /// The digest was new and is now recorded for the given path.
    Recorded,
    /// The digest was already recorded for `existing`.
    Duplicate { existing: PathBuf },
}

/// Ledger of content digests backed by SQLite.
///
/// Cloning is cheap; clones share the pool and the check-then-act mutex.
#[derive(Debug, Clone)]
pub struct HashLedger {
    db: Database,
    guard: Arc<Mutex<()>>,
}

impl HashLedger {
    /// Opens the ledger on an already-migrated database.
    #[must_use]
    pub fn open(db: &Database) -> Self {
        Self {
            db: db.clone(),
            guard: Arc::new(Mutex::new(())),
        }
    }

    /// Whether `hash` has been recorded.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the digest is malformed or the query fails.
    #[instrument(level = "debug", skip(self))]
    pub async fn contains(&self, hash: &str) -> Result<bool> {
        validate_digest(hash)?;
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM hash_records WHERE sha256 = ?")
            .bind(hash)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.is_some())
    }

    /// Records `hash` for `path`. Returns `false` if it was already present.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the digest is malformed or the insert fails.
    #[instrument(level = "debug", skip(self, path), fields(path = %path.display()))]
    pub async fn record(&self, hash: &str, path: &Path) -> Result<bool> {
        validate_digest(hash)?;
        let result = sqlx::query(
            r"INSERT OR IGNORE INTO hash_records (sha256, absolute_path, first_seen)
              VALUES (?, ?, ?)",
        )
        .bind(hash)
        .bind(path.to_string_lossy().as_ref())
        .bind(unix_now())
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Returns the record for `hash`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the digest is malformed or the query fails.
    pub async fn lookup(&self, hash: &str) -> Result<Option<HashRecord>> {
        validate_digest(hash)?;
        let record = sqlx::query_as::<_, HashRecord>(
            "SELECT sha256, absolute_path, first_seen FROM hash_records WHERE sha256 = ?",
        )
        .bind(hash)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(record)
    }

    /// Atomically records `hash` for `path` unless it is already known.
    ///
    /// All callers in the process serialize on one mutex for the duration
    /// of the lookup and insert.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the digest is malformed or a query fails.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn check_and_record(&self, hash: &str, path: &Path) -> Result<LedgerDecision> {
        let _guard = self.guard.lock().await;

        if let Some(existing) = self.lookup(hash).await? {
            debug!(existing = %existing.absolute_path, "content already archived");
            return Ok(LedgerDecision::Duplicate {
                existing: existing.path(),
            });
        }

        if self.record(hash, path).await? {
            Ok(LedgerDecision::Recorded)
        } else {
            // Another process sharing the ledger file won the insert
            let existing = self
                .lookup(hash)
                .await?
                .map_or_else(|| path.to_path_buf(), |record| record.path());
            Ok(LedgerDecision::Duplicate { existing })
        }
    }

    /// Removes the record for `hash`, e.g. when the file could not be placed.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the digest is malformed or the delete fails.
    pub async fn forget(&self, hash: &str) -> Result<()> {
        validate_digest(hash)?;
        let _guard = self.guard.lock().await;
        sqlx::query("DELETE FROM hash_records WHERE sha256 = ?")
            .bind(hash)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Prunes records whose file no longer exists. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if a query fails.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<usize> {
        let _guard = self.guard.lock().await;

        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT sha256, absolute_path FROM hash_records")
                .fetch_all(self.db.pool())
                .await?;

        let mut pruned = 0usize;
        for (sha256, absolute_path) in rows {
            let present = tokio::fs::try_exists(&absolute_path).await.unwrap_or_else(|e| {
                warn!(path = %absolute_path, error = %e, "cannot stat archived file, keeping record");
                true
            });
            if present {
                continue;
            }
            sqlx::query("DELETE FROM hash_records WHERE sha256 = ?")
                .bind(&sha256)
                .execute(self.db.pool())
                .await?;
            debug!(path = %absolute_path, "pruned record of vanished file");
            pruned += 1;
        }

        if pruned > 0 {
            info!(pruned, "ledger reconciled");
        }
        Ok(pruned)
    }

    /// Number of recorded digests.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the query fails.
    pub async fn len(&self) -> Result<usize> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM hash_records")
            .fetch_one(self.db.pool())
            .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Whether no digests are recorded.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the query fails.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

fn validate_digest(hash: &str) -> Result<()> {
    if hash.len() == 64
        && hash
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        Ok(())
    } else {
        Err(LedgerError::InvalidDigest(hash.to_string()))
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
