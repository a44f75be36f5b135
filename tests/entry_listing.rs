//! Integration tests for the read-side entry listing: ordering, filters,
//! limits, and cursor-based pagination through the Reader facade.
//!
//! State is seeded directly through the storage port with explicit
//! timestamps so ordering assertions are deterministic.

use chrono::{DateTime, TimeZone, Utc};
use futures::{pin_mut, StreamExt};
use pretty_assertions::assert_eq;

use riffle::config::Config;
use riffle::fetch::{FetchConfig, Fetcher};
use riffle::storage::{EntryFilter, Storage};
use riffle::types::{Entry, EntryUpdateIntent, Feed, FeedUpdateIntent};
use riffle::Reader;

const URL: &str = "https://example.com/feed";

fn ts(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).unwrap()
}

fn entry_intent(id: &str, epoch: i64) -> EntryUpdateIntent {
    EntryUpdateIntent {
        feed_url: URL.to_string(),
        entry: Entry {
            feed_url: URL.to_string(),
            id: id.to_string(),
            updated: ts(epoch),
            published: None,
            title: Some(format!("Entry {id}")),
            link: None,
            author: None,
            summary: None,
            content: vec![],
            enclosures: vec![],
            read: false,
            important: false,
        },
        last_updated: ts(epoch),
        first_updated_epoch: Some(ts(epoch)),
        feed_order: 0,
    }
}

/// A reader over seeded storage: five entries observed at distinct
/// epochs 100..=500 (so "newest first" is e5, e4, e3, e2, e1).
async fn seeded_reader(chunk_size: usize) -> Reader {
    let config = Config {
        chunk_size,
        ..Config::default()
    };
    let storage = Storage::open(":memory:").await.unwrap();
    storage.add_feed(URL).await.unwrap();
    storage
        .apply_update(
            &FeedUpdateIntent {
                url: URL.to_string(),
                last_updated: ts(100),
                feed: Some(Feed::new(URL)),
                http_etag: None,
                http_last_modified: None,
            },
            &[
                entry_intent("e1", 100),
                entry_intent("e2", 200),
                entry_intent("e3", 300),
                entry_intent("e4", 400),
                entry_intent("e5", 500),
            ],
        )
        .await
        .unwrap();

    let fetcher = Fetcher::new(FetchConfig::default()).unwrap();
    Reader::new(storage, fetcher, &config)
}

async fn collect_ids(reader: &Reader, filter: EntryFilter, limit: usize) -> Vec<String> {
    let entries = reader.get_entries(filter, limit);
    pin_mut!(entries);
    let mut ids = Vec::new();
    while let Some(entry) = entries.next().await {
        ids.push(entry.unwrap().id);
    }
    ids
}

// ============================================================================
// Ordering and Limits
// ============================================================================

#[tokio::test]
async fn test_entries_come_newest_first() {
    let reader = seeded_reader(256).await;
    let ids = collect_ids(&reader, EntryFilter::default(), 0).await;
    assert_eq!(ids, vec!["e5", "e4", "e3", "e2", "e1"]);
}

#[tokio::test]
async fn test_limit_truncates_the_stream() {
    let reader = seeded_reader(256).await;
    let ids = collect_ids(&reader, EntryFilter::default(), 2).await;
    assert_eq!(ids, vec!["e5", "e4"]);
}

#[tokio::test]
async fn test_small_chunks_yield_the_same_sequence() {
    // chunk_size 2 forces three storage round-trips behind one stream.
    let reader = seeded_reader(2).await;
    let ids = collect_ids(&reader, EntryFilter::default(), 0).await;
    assert_eq!(ids, vec!["e5", "e4", "e3", "e2", "e1"]);
}

#[tokio::test]
async fn test_chunking_disabled_yields_the_same_sequence() {
    let reader = seeded_reader(0).await;
    let ids = collect_ids(&reader, EntryFilter::default(), 0).await;
    assert_eq!(ids, vec!["e5", "e4", "e3", "e2", "e1"]);
}

#[tokio::test]
async fn test_limit_with_small_chunks() {
    let reader = seeded_reader(2).await;
    let ids = collect_ids(&reader, EntryFilter::default(), 3).await;
    assert_eq!(ids, vec!["e5", "e4", "e3"]);
}

// ============================================================================
// Filters
// ============================================================================

#[tokio::test]
async fn test_filter_by_read_state() {
    let reader = seeded_reader(256).await;
    reader.mark_entry_read(URL, "e4").await.unwrap();
    reader.mark_entry_read(URL, "e2").await.unwrap();

    let unread = collect_ids(
        &reader,
        EntryFilter {
            read: Some(false),
            ..Default::default()
        },
        0,
    )
    .await;
    assert_eq!(unread, vec!["e5", "e3", "e1"]);

    let read = collect_ids(
        &reader,
        EntryFilter {
            read: Some(true),
            ..Default::default()
        },
        0,
    )
    .await;
    assert_eq!(read, vec!["e4", "e2"]);
}

#[tokio::test]
async fn test_filter_by_important() {
    let reader = seeded_reader(256).await;
    reader.mark_entry_important(URL, "e3").await.unwrap();

    let important = collect_ids(
        &reader,
        EntryFilter {
            important: Some(true),
            ..Default::default()
        },
        0,
    )
    .await;
    assert_eq!(important, vec!["e3"]);

    // ...and it can be taken back.
    reader.mark_entry_unimportant(URL, "e3").await.unwrap();
    let important = collect_ids(
        &reader,
        EntryFilter {
            important: Some(true),
            ..Default::default()
        },
        0,
    )
    .await;
    assert!(important.is_empty());
}

#[tokio::test]
async fn test_filter_by_feed() {
    let reader = seeded_reader(256).await;

    let other = "https://example.com/other";
    reader.storage().add_feed(other).await.unwrap();
    reader
        .storage()
        .apply_update(
            &FeedUpdateIntent {
                url: other.to_string(),
                last_updated: ts(600),
                feed: Some(Feed::new(other)),
                http_etag: None,
                http_last_modified: None,
            },
            &[{
                let mut intent = entry_intent("o1", 600);
                intent.feed_url = other.to_string();
                intent.entry.feed_url = other.to_string();
                intent
            }],
        )
        .await
        .unwrap();

    let ids = collect_ids(
        &reader,
        EntryFilter {
            feed_url: Some(other.to_string()),
            ..Default::default()
        },
        0,
    )
    .await;
    assert_eq!(ids, vec!["o1"]);

    // Without a filter, the other feed's newer entry leads.
    let all = collect_ids(&reader, EntryFilter::default(), 0).await;
    assert_eq!(all.first().map(String::as_str), Some("o1"));
    assert_eq!(all.len(), 6);
}

// ============================================================================
// Cursor Restart
// ============================================================================

#[tokio::test]
async fn test_listing_restarts_from_cursor() {
    let reader = seeded_reader(256).await;

    // Take the first page directly from storage, keeping its cursor.
    let page = reader
        .storage()
        .entries_page(&EntryFilter::default(), 2, None)
        .await
        .unwrap();
    assert_eq!(page.len(), 2);
    let (_, cursor) = page.last().unwrap().clone();

    // Resume exactly after it.
    let rest = reader
        .storage()
        .entries_page(&EntryFilter::default(), 0, Some(cursor))
        .await
        .unwrap();
    let ids: Vec<&str> = rest.iter().map(|(e, _)| e.id.as_str()).collect();
    assert_eq!(ids, vec!["e3", "e2", "e1"]);
}

#[tokio::test]
async fn test_user_title_override_in_listing() {
    let reader = seeded_reader(256).await;
    reader
        .set_feed_user_title(URL, Some("My Feed"))
        .await
        .unwrap();

    let feeds = reader.list_feeds().await.unwrap();
    assert_eq!(feeds.len(), 1);
    assert_eq!(feeds[0].resolved_title(), Some("My Feed"));
}
