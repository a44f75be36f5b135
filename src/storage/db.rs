use std::str::FromStr;
use std::time::Duration;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};

use super::types::StorageError;

// ============================================================================
// Storage
// ============================================================================

/// The storage port: single source of truth for persisted feed and entry
/// state.
///
/// Concurrent reads are fine; writes go through one transaction per
/// logical operation and rely on SQLite's single-writer discipline (plus
/// `busy_timeout`) for serialization across concurrently updating feeds.
#[derive(Clone)]
pub struct Storage {
    pub(crate) pool: SqlitePool,
}

impl Storage {
    /// Open a database connection and run migrations
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InstanceLocked` if another process has the
    /// database locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `StorageError::Migration` if the schema could not be set
    /// up, and `StorageError::Other` for other database errors.
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout=5000: SQLite waits up to 5 seconds for locks to
        // release before returning SQLITE_BUSY. This absorbs transient
        // contention between concurrent feed updates automatically.
        // Using pragma() ensures all connections in the pool inherit it.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StorageError::from_sqlx)?
            .pragma("busy_timeout", "5000");
        // SQLite is single-writer; 5 connections covers peak concurrent
        // readers (update workers + listing queries). An unadorned
        // ':memory:' database is per-connection, so it gets exactly one.
        let max_connections = if path == ":memory:" { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StorageError::from_sqlx)?;
        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All schema statements use `IF NOT EXISTS`, so re-running on an
    /// existing database is a no-op; a failure mid-way rolls the whole
    /// migration back.
    async fn migrate(&self) -> Result<(), StorageError> {
        // Enable foreign keys (per-connection setting, outside the tx)
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.pool)
            .await
            .map_err(StorageError::from_sqlx)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                url TEXT PRIMARY KEY NOT NULL,
                title TEXT,
                link TEXT,
                author TEXT,
                user_title TEXT,
                updated INTEGER,
                http_etag TEXT,
                http_last_modified TEXT,
                stale INTEGER NOT NULL DEFAULT 0,
                last_updated INTEGER,
                added INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Migration(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                feed_url TEXT NOT NULL REFERENCES feeds(url) ON DELETE CASCADE,
                id TEXT NOT NULL,
                updated INTEGER NOT NULL,
                published INTEGER,
                title TEXT,
                link TEXT,
                author TEXT,
                summary TEXT,
                content TEXT NOT NULL DEFAULT '[]',
                enclosures TEXT NOT NULL DEFAULT '[]',
                read INTEGER NOT NULL DEFAULT 0,
                important INTEGER NOT NULL DEFAULT 0,
                last_updated INTEGER NOT NULL,
                first_updated_epoch INTEGER NOT NULL,
                feed_order INTEGER NOT NULL,
                PRIMARY KEY (feed_url, id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Migration(e.to_string()))?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_entries_feed ON entries(feed_url)",
            "CREATE INDEX IF NOT EXISTS idx_entries_recent ON entries(first_updated_epoch DESC)",
            "CREATE INDEX IF NOT EXISTS idx_entries_read ON entries(read)",
            "CREATE INDEX IF NOT EXISTS idx_entries_important ON entries(important)",
        ] {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| StorageError::Migration(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;
        Ok(())
    }
}
