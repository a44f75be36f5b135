//! Core data model shared across the fetch, parse, storage, and update
//! layers: persisted feeds and entries, the update-relevant snapshots the
//! storage layer hands to the reconciler, and the write intents the
//! reconciler hands back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Persisted Model
// ============================================================================

/// A syndication feed, identified by its URL.
///
/// `user_title` is owned by the user and never touched by reconciliation;
/// all other metadata fields are proposed by the reconciler and written by
/// storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    pub url: String,
    /// The date the feed itself claims it was last updated.
    pub updated: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub author: Option<String>,
    /// User-set title override. Reconciliation never writes this.
    pub user_title: Option<String>,
}

impl Feed {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            updated: None,
            title: None,
            link: None,
            author: None,
            user_title: None,
        }
    }

    /// The title to display: the user override if set, the feed title
    /// otherwise.
    pub fn resolved_title(&self) -> Option<&str> {
        self.user_title.as_deref().or(self.title.as_deref())
    }
}

/// One item within a feed, identified by `(feed_url, id)`.
///
/// `updated` is never null once persisted; the reconciler fabricates a
/// value when the document does not provide one. `read` and `important`
/// are user-owned flags that reconciliation never overwrites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub feed_url: String,
    pub id: String,
    pub updated: DateTime<Utc>,
    pub published: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub author: Option<String>,
    pub summary: Option<String>,
    pub content: Vec<Content>,
    pub enclosures: Vec<Enclosure>,
    pub read: bool,
    pub important: bool,
}

/// A piece of entry content (Atom allows several per entry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// An attached resource (podcast audio, images, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enclosure {
    pub href: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
}

// ============================================================================
// Parsed (pre-reconciliation) Model
// ============================================================================

/// Output of the normalizer: canonical feed metadata plus the entries in
/// document order.
///
/// The caching tokens come from the retrieval, not the document; the
/// update pipeline stamps them on before reconciliation.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub feed: Feed,
    pub entries: Vec<ParsedEntry>,
    pub http_etag: Option<String>,
    pub http_last_modified: Option<String>,
}

/// Like [`Entry`], but `updated` may still be absent; the reconciler
/// assigns one before anything is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEntry {
    pub id: String,
    pub updated: Option<DateTime<Utc>>,
    pub published: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub author: Option<String>,
    pub summary: Option<String>,
    pub content: Vec<Content>,
    pub enclosures: Vec<Enclosure>,
}

// ============================================================================
// Update Snapshots (Storage → Reconciler)
// ============================================================================

/// Update-relevant information about an existing feed, read from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedForUpdate {
    pub url: String,
    /// The date the feed was last updated, according to the feed.
    pub updated: Option<DateTime<Utc>>,
    pub http_etag: Option<String>,
    pub http_last_modified: Option<String>,
    /// Whether the next update should re-evaluate *all* entries,
    /// regardless of their `updated`.
    pub stale: bool,
    /// The date the feed was last updated by us; None if never.
    pub last_updated: Option<DateTime<Utc>>,
}

/// Update-relevant information about an existing entry, read from storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryForUpdate {
    /// The date the entry was last updated, according to the entry.
    pub updated: DateTime<Utc>,
}

// ============================================================================
// Write Intents (Reconciler → Storage)
// ============================================================================

/// Write instruction for feed metadata and caching tokens.
///
/// `feed` is None when the metadata did not change; the caching tokens and
/// `last_updated` are written either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedUpdateIntent {
    pub url: String,
    /// The time at the start of updating this feed.
    pub last_updated: DateTime<Utc>,
    pub feed: Option<Feed>,
    pub http_etag: Option<String>,
    pub http_last_modified: Option<String>,
}

/// Write instruction for one new or modified entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryUpdateIntent {
    pub feed_url: String,
    pub entry: Entry,
    /// The time at the start of updating this feed.
    pub last_updated: DateTime<Utc>,
    /// The time at the start of updating this batch of feeds; None if the
    /// entry already exists (storage keeps the stored value, so the epoch
    /// never regresses).
    pub first_updated_epoch: Option<DateTime<Utc>>,
    /// Zero-based position of the entry in the parsed document.
    pub feed_order: usize,
}

/// How the reconciler classified an entry that produced an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    New,
    Modified,
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryStatus::New => write!(f, "new"),
            EntryStatus::Modified => write!(f, "modified"),
        }
    }
}

// ============================================================================
// Feed References
// ============================================================================

/// A feed argument: either a bare URL or a previously fetched [`Feed`].
///
/// Every public API taking a feed resolves it through [`FeedRef::as_url`],
/// the single coercion point; there is no duck typing anywhere else.
#[derive(Debug, Clone, Copy)]
pub enum FeedRef<'a> {
    Url(&'a str),
    Feed(&'a Feed),
}

impl FeedRef<'_> {
    pub fn as_url(&self) -> &str {
        match self {
            FeedRef::Url(url) => url,
            FeedRef::Feed(feed) => &feed.url,
        }
    }
}

impl<'a> From<&'a str> for FeedRef<'a> {
    fn from(url: &'a str) -> Self {
        FeedRef::Url(url)
    }
}

impl<'a> From<&'a String> for FeedRef<'a> {
    fn from(url: &'a String) -> Self {
        FeedRef::Url(url)
    }
}

impl<'a> From<&'a Feed> for FeedRef<'a> {
    fn from(feed: &'a Feed) -> Self {
        FeedRef::Feed(feed)
    }
}
