use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{Content, Enclosure, Entry, Feed};

// ============================================================================
// Error Types
// ============================================================================

/// Storage-layer errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Another instance of the application has locked the database
    #[error("another instance appears to be running and holds the database lock")]
    InstanceLocked,

    /// Migration failed
    #[error("database migration failed: {0}")]
    Migration(String),

    /// A feed-scoped operation referenced a URL that is not stored
    #[error("no feed with URL: {0}")]
    FeedNotFound(String),

    /// The feed is already stored
    #[error("feed already exists: {0}")]
    FeedExists(String),

    /// An entry-scoped operation referenced an id that is not stored
    #[error("no entry {1} in feed {0}")]
    EntryNotFound(String, String),

    /// A JSON column (content, enclosures) failed to round-trip
    #[error("invalid stored data: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic database error
    #[error("database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl StorageError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        // SQLITE_CANTOPEN (14): unable to open database file
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return StorageError::InstanceLocked;
        }

        StorageError::Other(err)
    }
}

// ============================================================================
// Filters and Cursors
// ============================================================================

/// Options for filtering entry listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFilter {
    pub feed_url: Option<String>,
    pub read: Option<bool>,
    pub important: Option<bool>,
}

/// Cursor into the entry listing, newest first.
///
/// Listings order by `(first_updated_epoch, feed_url, id)` descending;
/// the cursor is the key of the last row seen, so a listing can resume
/// exactly after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryCursor {
    pub(crate) epoch: i64,
    pub(crate) feed_url: String,
    pub(crate) id: String,
}

// ============================================================================
// Row Types
// ============================================================================

/// Raw feeds row (timestamps as unix seconds, flags as integers).
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedRow {
    pub url: String,
    pub title: Option<String>,
    pub link: Option<String>,
    pub author: Option<String>,
    pub user_title: Option<String>,
    pub updated: Option<i64>,
}

impl FeedRow {
    pub(crate) fn into_feed(self) -> Feed {
        Feed {
            url: self.url,
            updated: self.updated.map(datetime_from_seconds),
            title: self.title,
            link: self.link,
            author: self.author,
            user_title: self.user_title,
        }
    }
}

/// Raw entries row; content and enclosures are JSON columns.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EntryRow {
    pub feed_url: String,
    pub id: String,
    pub updated: i64,
    pub published: Option<i64>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub author: Option<String>,
    pub summary: Option<String>,
    pub content: String,
    pub enclosures: String,
    pub read: bool,
    pub important: bool,
    pub first_updated_epoch: i64,
}

impl EntryRow {
    pub(crate) fn into_entry(self) -> Result<Entry, StorageError> {
        let content: Vec<Content> = serde_json::from_str(&self.content)?;
        let enclosures: Vec<Enclosure> = serde_json::from_str(&self.enclosures)?;
        Ok(Entry {
            feed_url: self.feed_url,
            id: self.id,
            updated: datetime_from_seconds(self.updated),
            published: self.published.map(datetime_from_seconds),
            title: self.title,
            link: self.link,
            author: self.author,
            summary: self.summary,
            content,
            enclosures,
            read: self.read,
            important: self.important,
        })
    }

    pub(crate) fn cursor(&self) -> EntryCursor {
        EntryCursor {
            epoch: self.first_updated_epoch,
            feed_url: self.feed_url.clone(),
            id: self.id.clone(),
        }
    }
}

// ============================================================================
// Timestamp Helpers
// ============================================================================

/// All timestamps are persisted as unix seconds (UTC).
pub(crate) fn datetime_from_seconds(seconds: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(seconds, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
