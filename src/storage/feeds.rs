use chrono::Utc;
use sqlx::sqlite::SqliteConnection;

use super::db::Storage;
use super::types::{FeedRow, StorageError};
use crate::types::{Feed, FeedForUpdate, FeedUpdateIntent};

impl Storage {
    // ========================================================================
    // Feed Management
    // ========================================================================

    /// Register a feed URL. Metadata stays empty until the first
    /// successful update.
    pub async fn add_feed(&self, url: &str) -> Result<(), StorageError> {
        let now = Utc::now().timestamp();
        let result = sqlx::query("INSERT INTO feeds (url, added) VALUES (?, ?)")
            .bind(url)
            .bind(now)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::FeedExists(url.to_string()))
            }
            Err(e) => Err(StorageError::from_sqlx(e)),
        }
    }

    /// Delete a feed and (via cascade) all its entries.
    pub async fn remove_feed(&self, url: &str) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM feeds WHERE url = ?")
            .bind(url)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::FeedNotFound(url.to_string()));
        }
        Ok(())
    }

    pub async fn get_feed(&self, url: &str) -> Result<Option<Feed>, StorageError> {
        let row: Option<FeedRow> = sqlx::query_as(
            "SELECT url, title, link, author, user_title, updated FROM feeds WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(FeedRow::into_feed))
    }

    /// All feeds, sorted by their displayed title.
    pub async fn list_feeds(&self) -> Result<Vec<Feed>, StorageError> {
        let rows: Vec<FeedRow> = sqlx::query_as(
            r#"
            SELECT url, title, link, author, user_title, updated
            FROM feeds
            ORDER BY coalesce(user_title, title, url)
        "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(FeedRow::into_feed).collect())
    }

    /// All stored feed URLs, in stable (alphabetical) order.
    pub async fn feed_urls(&self) -> Result<Vec<String>, StorageError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT url FROM feeds ORDER BY url")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(url,)| url).collect())
    }

    /// Set or clear the user's title override. Never touched by updates.
    pub async fn set_feed_user_title(
        &self,
        url: &str,
        user_title: Option<&str>,
    ) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE feeds SET user_title = ? WHERE url = ?")
            .bind(user_title)
            .bind(url)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::FeedNotFound(url.to_string()));
        }
        Ok(())
    }

    /// Force the next update to re-evaluate every entry regardless of
    /// timestamps (e.g. after a semantics change).
    pub async fn set_feed_stale(&self, url: &str, stale: bool) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE feeds SET stale = ? WHERE url = ?")
            .bind(stale)
            .bind(url)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::FeedNotFound(url.to_string()));
        }
        Ok(())
    }

    // ========================================================================
    // Update Support
    // ========================================================================

    /// The update-relevant snapshot of a feed, or None if the URL is not
    /// stored.
    pub async fn get_feed_for_update(
        &self,
        url: &str,
    ) -> Result<Option<FeedForUpdate>, StorageError> {
        let row: Option<(String, Option<i64>, Option<String>, Option<String>, bool, Option<i64>)> =
            sqlx::query_as(
                r#"
                SELECT url, updated, http_etag, http_last_modified, stale, last_updated
                FROM feeds WHERE url = ?
            "#,
            )
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(
            |(url, updated, http_etag, http_last_modified, stale, last_updated)| FeedForUpdate {
                url,
                updated: updated.map(super::types::datetime_from_seconds),
                http_etag,
                http_last_modified,
                stale,
                last_updated: last_updated.map(super::types::datetime_from_seconds),
            },
        ))
    }

    /// Apply a feed-level intent on its own (outside a combined update).
    pub async fn apply_feed_update(&self, intent: &FeedUpdateIntent) -> Result<(), StorageError> {
        let mut conn = self.pool.acquire().await?;
        write_feed_intent(&mut *conn, intent).await
    }
}

/// Writes one feed intent. A full feed write replaces the metadata and
/// clears `stale`; otherwise only the caching tokens and `last_updated`
/// move. `user_title` is never written here.
pub(super) async fn write_feed_intent(
    conn: &mut SqliteConnection,
    intent: &FeedUpdateIntent,
) -> Result<(), StorageError> {
    let result = if let Some(feed) = &intent.feed {
        sqlx::query(
            r#"
            UPDATE feeds
            SET title = ?, link = ?, author = ?, updated = ?,
                http_etag = ?, http_last_modified = ?,
                stale = 0, last_updated = ?
            WHERE url = ?
        "#,
        )
        .bind(&feed.title)
        .bind(&feed.link)
        .bind(&feed.author)
        .bind(feed.updated.map(|d| d.timestamp()))
        .bind(&intent.http_etag)
        .bind(&intent.http_last_modified)
        .bind(intent.last_updated.timestamp())
        .bind(&intent.url)
        .execute(&mut *conn)
        .await?
    } else {
        sqlx::query(
            r#"
            UPDATE feeds
            SET http_etag = ?, http_last_modified = ?, last_updated = ?
            WHERE url = ?
        "#,
        )
        .bind(&intent.http_etag)
        .bind(&intent.http_last_modified)
        .bind(intent.last_updated.timestamp())
        .bind(&intent.url)
        .execute(&mut *conn)
        .await?
    };

    if result.rows_affected() == 0 {
        return Err(StorageError::FeedNotFound(intent.url.clone()));
    }
    Ok(())
}
