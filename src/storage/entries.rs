use sqlx::sqlite::SqliteConnection;
use sqlx::QueryBuilder;

use super::db::Storage;
use super::feeds::write_feed_intent;
use super::types::{datetime_from_seconds, EntryCursor, EntryFilter, EntryRow, StorageError};
use crate::types::{Entry, EntryForUpdate, EntryUpdateIntent, FeedUpdateIntent};

impl Storage {
    // ========================================================================
    // Update Writes
    // ========================================================================

    /// Apply one feed's update (the feed-level intent plus its entry
    /// intents) as a single transaction, so a crash mid-update never
    /// leaves the feed half-written.
    pub async fn apply_update(
        &self,
        feed: &FeedUpdateIntent,
        entries: &[EntryUpdateIntent],
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        write_feed_intent(&mut *tx, feed).await?;
        for intent in entries {
            upsert_entry(&mut *tx, intent).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Apply entry-level intents on their own (outside a combined
    /// update), still as one transaction.
    pub async fn apply_entry_updates(
        &self,
        entries: &[EntryUpdateIntent],
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        for intent in entries {
            upsert_entry(&mut *tx, intent).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // ========================================================================
    // Update Reads
    // ========================================================================

    /// One page of per-entry update snapshots for a feed, keyed and
    /// ordered by entry id. `size = 0` means no limit. Items are paired
    /// with their cursor key for [`crate::util::paginate`].
    pub async fn entries_for_update_page(
        &self,
        url: &str,
        size: usize,
        last: Option<String>,
    ) -> Result<Vec<((String, EntryForUpdate), String)>, StorageError> {
        let limit = if size == 0 { -1 } else { size as i64 };
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT id, updated FROM entries
            WHERE feed_url = ? AND (? IS NULL OR id > ?)
            ORDER BY id
            LIMIT ?
        "#,
        )
        .bind(url)
        .bind(last.clone())
        .bind(last)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, updated)| {
                let snapshot = EntryForUpdate {
                    updated: datetime_from_seconds(updated),
                };
                ((id.clone(), snapshot), id)
            })
            .collect())
    }

    // ========================================================================
    // Entry Listing
    // ========================================================================

    /// One page of entries, newest first, optionally filtered. Items are
    /// paired with their cursor key for [`crate::util::paginate`];
    /// passing the last key back resumes right after it.
    pub async fn entries_page(
        &self,
        filter: &EntryFilter,
        size: usize,
        last: Option<EntryCursor>,
    ) -> Result<Vec<(Entry, EntryCursor)>, StorageError> {
        let mut qb: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            "SELECT feed_url, id, updated, published, title, link, author, summary, \
             content, enclosures, read, important, first_updated_epoch \
             FROM entries WHERE 1 = 1",
        );

        if let Some(feed_url) = &filter.feed_url {
            qb.push(" AND feed_url = ").push_bind(feed_url);
        }
        if let Some(read) = filter.read {
            qb.push(" AND read = ").push_bind(read);
        }
        if let Some(important) = filter.important {
            qb.push(" AND important = ").push_bind(important);
        }
        if let Some(cursor) = last {
            qb.push(" AND (first_updated_epoch, feed_url, id) < (")
                .push_bind(cursor.epoch)
                .push(", ")
                .push_bind(cursor.feed_url)
                .push(", ")
                .push_bind(cursor.id)
                .push(")");
        }

        qb.push(" ORDER BY first_updated_epoch DESC, feed_url DESC, id DESC");
        if size > 0 {
            qb.push(" LIMIT ").push_bind(size as i64);
        }

        let rows: Vec<EntryRow> = qb.build_query_as().fetch_all(&self.pool).await?;

        rows.into_iter()
            .map(|row| {
                let cursor = row.cursor();
                Ok((row.into_entry()?, cursor))
            })
            .collect()
    }

    pub async fn get_entry(&self, feed_url: &str, id: &str) -> Result<Entry, StorageError> {
        let row: Option<EntryRow> = sqlx::query_as(
            r#"
            SELECT feed_url, id, updated, published, title, link, author, summary,
                   content, enclosures, read, important, first_updated_epoch
            FROM entries WHERE feed_url = ? AND id = ?
        "#,
        )
        .bind(feed_url)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.into_entry(),
            None => Err(StorageError::EntryNotFound(
                feed_url.to_string(),
                id.to_string(),
            )),
        }
    }

    // ========================================================================
    // User Flags
    // ========================================================================

    pub async fn set_entry_read(
        &self,
        feed_url: &str,
        id: &str,
        read: bool,
    ) -> Result<(), StorageError> {
        self.set_entry_flag("read", feed_url, id, read).await
    }

    pub async fn set_entry_important(
        &self,
        feed_url: &str,
        id: &str,
        important: bool,
    ) -> Result<(), StorageError> {
        self.set_entry_flag("important", feed_url, id, important)
            .await
    }

    async fn set_entry_flag(
        &self,
        column: &'static str,
        feed_url: &str,
        id: &str,
        value: bool,
    ) -> Result<(), StorageError> {
        // column is one of two compile-time names, never user input
        let sql = format!("UPDATE entries SET {column} = ? WHERE feed_url = ? AND id = ?");
        let result = sqlx::query(&sql)
            .bind(value)
            .bind(feed_url)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::EntryNotFound(
                feed_url.to_string(),
                id.to_string(),
            ));
        }
        Ok(())
    }
}

/// Upserts one entry. The insert branch seeds `read`/`important` as
/// false and sets `first_updated_epoch`; the conflict branch leaves all
/// three alone, which is what preserves user flags and keeps the epoch
/// from regressing across re-fetches.
async fn upsert_entry(
    conn: &mut SqliteConnection,
    intent: &EntryUpdateIntent,
) -> Result<(), StorageError> {
    let entry = &intent.entry;
    let content = serde_json::to_string(&entry.content)?;
    let enclosures = serde_json::to_string(&entry.enclosures)?;
    // Only new entries carry an epoch; for existing ones the conflict
    // branch wins and this value is discarded.
    let epoch = intent
        .first_updated_epoch
        .unwrap_or(intent.last_updated)
        .timestamp();

    sqlx::query(
        r#"
        INSERT INTO entries (
            feed_url, id, updated, published, title, link, author, summary,
            content, enclosures, read, important,
            last_updated, first_updated_epoch, feed_order
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?, ?)
        ON CONFLICT(feed_url, id) DO UPDATE SET
            updated = excluded.updated,
            published = excluded.published,
            title = excluded.title,
            link = excluded.link,
            author = excluded.author,
            summary = excluded.summary,
            content = excluded.content,
            enclosures = excluded.enclosures,
            last_updated = excluded.last_updated,
            feed_order = excluded.feed_order
    "#,
    )
    .bind(&intent.feed_url)
    .bind(&entry.id)
    .bind(entry.updated.timestamp())
    .bind(entry.published.map(|d| d.timestamp()))
    .bind(&entry.title)
    .bind(&entry.link)
    .bind(&entry.author)
    .bind(&entry.summary)
    .bind(content)
    .bind(enclosures)
    .bind(intent.last_updated.timestamp())
    .bind(epoch)
    .bind(intent.feed_order as i64)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Content, Feed};
    use chrono::{DateTime, TimeZone, Utc};

    const URL: &str = "https://example.com/feed";

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    async fn storage_with_feed() -> Storage {
        let s = Storage::open(":memory:").await.unwrap();
        s.add_feed(URL).await.unwrap();
        s.apply_feed_update(&FeedUpdateIntent {
            url: URL.to_string(),
            last_updated: ts(100),
            feed: Some(Feed::new(URL)),
            http_etag: None,
            http_last_modified: None,
        })
        .await
        .unwrap();
        s
    }

    fn intent(id: &str, updated: i64, epoch: Option<i64>) -> EntryUpdateIntent {
        EntryUpdateIntent {
            feed_url: URL.to_string(),
            entry: Entry {
                feed_url: URL.to_string(),
                id: id.to_string(),
                updated: ts(updated),
                published: None,
                title: Some(format!("Entry {id}")),
                link: None,
                author: None,
                summary: None,
                content: vec![Content {
                    value: "<p>body</p>".to_string(),
                    media_type: Some("text/html".to_string()),
                    language: None,
                }],
                enclosures: vec![],
                read: false,
                important: false,
            },
            last_updated: ts(updated),
            first_updated_epoch: epoch.map(ts),
            feed_order: 0,
        }
    }

    #[tokio::test]
    async fn test_entry_roundtrip_with_json_columns() {
        let s = storage_with_feed().await;
        s.apply_entry_updates(&[intent("1", 100, Some(100))])
            .await
            .unwrap();

        let entry = s.get_entry(URL, "1").await.unwrap();
        assert_eq!(entry.content.len(), 1);
        assert_eq!(entry.content[0].value, "<p>body</p>");
        assert_eq!(entry.updated, ts(100));
    }

    #[tokio::test]
    async fn test_flags_and_epoch_survive_reupsert() {
        let s = storage_with_feed().await;
        s.apply_entry_updates(&[intent("1", 100, Some(100))])
            .await
            .unwrap();
        s.set_entry_read(URL, "1", true).await.unwrap();
        s.set_entry_important(URL, "1", true).await.unwrap();

        // Modified entry comes back without an epoch (existing entry).
        s.apply_entry_updates(&[intent("1", 200, None)]).await.unwrap();

        let entry = s.get_entry(URL, "1").await.unwrap();
        assert!(entry.read);
        assert!(entry.important);
        assert_eq!(entry.updated, ts(200));

        // Epoch is the original one, not the re-upsert's last_updated.
        let page = s
            .entries_page(&EntryFilter::default(), 0, None)
            .await
            .unwrap();
        assert_eq!(page[0].1.epoch, 100);
    }

    #[tokio::test]
    async fn test_entries_for_update_pages_by_id() {
        let s = storage_with_feed().await;
        let intents: Vec<EntryUpdateIntent> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|id| intent(id, 100, Some(100)))
            .collect();
        s.apply_entry_updates(&intents).await.unwrap();

        let first = s.entries_for_update_page(URL, 2, None).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].0 .0, "a");
        assert_eq!(first[1].1, "b");

        let second = s
            .entries_for_update_page(URL, 2, Some("b".to_string()))
            .await
            .unwrap();
        assert_eq!(second[0].0 .0, "c");

        let unbounded = s.entries_for_update_page(URL, 0, None).await.unwrap();
        assert_eq!(unbounded.len(), 5);
    }

    #[tokio::test]
    async fn test_entries_page_filters_and_cursor() {
        let s = storage_with_feed().await;
        s.apply_entry_updates(&[
            intent("1", 100, Some(100)),
            intent("2", 200, Some(200)),
            intent("3", 300, Some(300)),
        ])
        .await
        .unwrap();
        s.set_entry_read(URL, "2", true).await.unwrap();

        // Newest first.
        let all = s
            .entries_page(&EntryFilter::default(), 0, None)
            .await
            .unwrap();
        let ids: Vec<&str> = all.iter().map(|(e, _)| e.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "2", "1"]);

        // Unread only.
        let unread = s
            .entries_page(
                &EntryFilter {
                    read: Some(false),
                    ..Default::default()
                },
                0,
                None,
            )
            .await
            .unwrap();
        let ids: Vec<&str> = unread.iter().map(|(e, _)| e.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "1"]);

        // Cursor resumes after the first page.
        let page = s
            .entries_page(&EntryFilter::default(), 1, None)
            .await
            .unwrap();
        let cursor = page[0].1.clone();
        let rest = s
            .entries_page(&EntryFilter::default(), 0, Some(cursor))
            .await
            .unwrap();
        let ids: Vec<&str> = rest.iter().map(|(e, _)| e.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "1"]);
    }

    #[tokio::test]
    async fn test_missing_entry_flag_update_fails() {
        let s = storage_with_feed().await;
        let err = s.set_entry_read(URL, "nope", true).await.unwrap_err();
        assert!(matches!(err, StorageError::EntryNotFound(_, _)));
    }

    #[tokio::test]
    async fn test_combined_update_is_transactional() {
        let s = storage_with_feed().await;

        let mut feed = Feed::new(URL);
        feed.title = Some("Title".to_string());
        s.apply_update(
            &FeedUpdateIntent {
                url: URL.to_string(),
                last_updated: ts(500),
                feed: Some(feed),
                http_etag: None,
                http_last_modified: None,
            },
            &[intent("1", 500, Some(500))],
        )
        .await
        .unwrap();

        assert_eq!(
            s.get_feed(URL).await.unwrap().unwrap().title.as_deref(),
            Some("Title")
        );
        assert!(s.get_entry(URL, "1").await.is_ok());
    }
}
