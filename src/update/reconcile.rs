//! The reconciler: diffs a freshly parsed document against the stored
//! update-relevant snapshots and produces the minimal set of writes.
//!
//! Pure computation: no I/O, no clocks, no locks. Both timestamps it
//! needs (the start of this feed's update and the start of the whole
//! batch) are passed in by the caller.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::types::{
    Entry, EntryForUpdate, EntryStatus, EntryUpdateIntent, FeedForUpdate, FeedUpdateIntent,
    ParsedEntry, ParsedFeed,
};

/// Everything the reconciler decided for one feed.
#[derive(Debug)]
pub(crate) struct ReconcileOutcome {
    /// Always present: at minimum the caching tokens and `last_updated`
    /// are written, even when the feed metadata is unchanged.
    pub feed: FeedUpdateIntent,
    /// One intent per new or modified entry, in document order.
    pub entries: Vec<(EntryUpdateIntent, EntryStatus)>,
    /// Ids of entries present in the document but unchanged since the
    /// last update. Nothing is written and no hooks fire for these; the
    /// bucket exists for read-side consumers.
    pub unchanged: Vec<String>,
}

/// Diffs `parsed` against the stored snapshots.
///
/// Feed-level: a feed never updated before (or absent from storage) is
/// new and always gets its metadata written. A `stale` feed gets its
/// metadata written and every entry re-evaluated as modified, regardless
/// of timestamps. Otherwise the metadata is written only when the
/// feed-reported `updated` differs from the stored one.
///
/// Entry-level, in document order (the order is the authoritative
/// `feed_order`):
///
/// - entries without an `updated` take their `published` instead (RSS has
///   no distinct "updated" semantic, so the only available date is
///   promoted and `published` cleared); entries with neither get
///   `batch_start`, so a stored entry always has one
/// - entries not in storage are NEW; stored entries are MODIFIED when the
///   parsed `updated` is strictly newer (or the feed is stale), UNCHANGED
///   otherwise
/// - `first_updated_epoch` is `batch_start` for NEW entries and left
///   untouched for existing ones
///
/// If a document contains two entries with the same id, the first wins.
pub(crate) fn reconcile(
    parsed: ParsedFeed,
    prior: Option<&FeedForUpdate>,
    entry_priors: &HashMap<String, EntryForUpdate>,
    now: DateTime<Utc>,
    batch_start: DateTime<Utc>,
) -> ReconcileOutcome {
    let url = parsed.feed.url.clone();
    let is_new = prior.map_or(true, |p| p.last_updated.is_none());
    let stale = prior.is_some_and(|p| p.stale);

    let feed_changed = if is_new {
        tracing::debug!(url = %url, "feed has no last_updated, treating as new");
        true
    } else if stale {
        tracing::debug!(url = %url, "feed is stale, forcing update");
        true
    } else {
        parsed.feed.updated != prior.and_then(|p| p.updated)
    };

    let feed_intent = FeedUpdateIntent {
        url: url.clone(),
        last_updated: now,
        feed: feed_changed.then_some(parsed.feed),
        http_etag: parsed.http_etag,
        http_last_modified: parsed.http_last_modified,
    };

    let mut entries = Vec::new();
    let mut unchanged = Vec::new();
    let mut seen = HashSet::new();

    for (feed_order, parsed_entry) in parsed.entries.into_iter().enumerate() {
        if !seen.insert(parsed_entry.id.clone()) {
            tracing::debug!(
                url = %url,
                entry = %parsed_entry.id,
                "duplicate entry id in document, first occurrence wins"
            );
            continue;
        }

        let entry = resolve_entry(&url, parsed_entry, batch_start);

        let status = match entry_priors.get(&entry.id) {
            None => EntryStatus::New,
            Some(_) if stale => EntryStatus::Modified,
            Some(p) if p.updated < entry.updated => EntryStatus::Modified,
            Some(_) => {
                unchanged.push(entry.id);
                continue;
            }
        };

        let first_updated_epoch = match status {
            EntryStatus::New => Some(batch_start),
            EntryStatus::Modified => None,
        };

        entries.push((
            EntryUpdateIntent {
                feed_url: url.clone(),
                entry,
                last_updated: now,
                first_updated_epoch,
                feed_order,
            },
            status,
        ));
    }

    ReconcileOutcome {
        feed: feed_intent,
        entries,
        unchanged,
    }
}

/// Resolves a parsed entry into a persistable one: assigns a non-null
/// `updated`, promoting `published` when that is the only date.
///
/// The user flags start out false here; the storage upsert never
/// overwrites the stored values.
fn resolve_entry(feed_url: &str, parsed: ParsedEntry, batch_start: DateTime<Utc>) -> Entry {
    let (updated, published) = match (parsed.updated, parsed.published) {
        (Some(updated), published) => (updated, published),
        (None, Some(published)) => (published, None),
        (None, None) => (batch_start, None),
    };

    Entry {
        feed_url: feed_url.to_string(),
        id: parsed.id,
        updated,
        published,
        title: parsed.title,
        link: parsed.link,
        author: parsed.author,
        summary: parsed.summary,
        content: parsed.content,
        enclosures: parsed.enclosures,
        read: false,
        important: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Feed;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    const URL: &str = "https://example.com/feed.xml";

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    fn parsed_entry(id: &str) -> ParsedEntry {
        ParsedEntry {
            id: id.to_string(),
            updated: Some(ts(100)),
            published: None,
            title: Some(format!("Entry {id}")),
            link: None,
            author: None,
            summary: None,
            content: vec![],
            enclosures: vec![],
        }
    }

    fn parsed_feed(entries: Vec<ParsedEntry>) -> ParsedFeed {
        let mut feed = Feed::new(URL);
        feed.updated = Some(ts(100));
        feed.title = Some("Feed".to_string());
        ParsedFeed {
            feed,
            entries,
            http_etag: Some("\"etag\"".to_string()),
            http_last_modified: None,
        }
    }

    fn prior(updated: Option<DateTime<Utc>>, stale: bool) -> FeedForUpdate {
        FeedForUpdate {
            url: URL.to_string(),
            updated,
            http_etag: None,
            http_last_modified: None,
            stale,
            last_updated: Some(ts(50)),
        }
    }

    fn priors(pairs: &[(&str, i64)]) -> HashMap<String, EntryForUpdate> {
        pairs
            .iter()
            .map(|(id, seconds)| {
                (
                    id.to_string(),
                    EntryForUpdate {
                        updated: ts(*seconds),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_new_feed_emits_full_feed_and_new_entries() {
        let outcome = reconcile(
            parsed_feed(vec![parsed_entry("1"), parsed_entry("2")]),
            None,
            &HashMap::new(),
            ts(200),
            ts(200),
        );

        assert!(outcome.feed.feed.is_some());
        assert_eq!(outcome.feed.last_updated, ts(200));
        assert_eq!(outcome.feed.http_etag.as_deref(), Some("\"etag\""));
        assert_eq!(outcome.entries.len(), 2);
        for (intent, status) in &outcome.entries {
            assert_eq!(*status, EntryStatus::New);
            assert_eq!(intent.first_updated_epoch, Some(ts(200)));
        }
        assert!(outcome.unchanged.is_empty());
    }

    #[test]
    fn test_never_updated_feed_treated_as_new() {
        let mut p = prior(Some(ts(100)), false);
        p.last_updated = None;

        let outcome = reconcile(
            parsed_feed(vec![]),
            Some(&p),
            &HashMap::new(),
            ts(200),
            ts(200),
        );

        assert!(outcome.feed.feed.is_some());
    }

    #[test]
    fn test_unchanged_feed_emits_no_feed_metadata() {
        let outcome = reconcile(
            parsed_feed(vec![]),
            Some(&prior(Some(ts(100)), false)),
            &HashMap::new(),
            ts(200),
            ts(200),
        );

        // Same feed-reported updated: metadata not written, but the
        // caching tokens and last_updated still are.
        assert!(outcome.feed.feed.is_none());
        assert_eq!(outcome.feed.last_updated, ts(200));
        assert_eq!(outcome.feed.http_etag.as_deref(), Some("\"etag\""));
    }

    #[test]
    fn test_changed_feed_updated_emits_full_feed() {
        let outcome = reconcile(
            parsed_feed(vec![]),
            Some(&prior(Some(ts(99)), false)),
            &HashMap::new(),
            ts(200),
            ts(200),
        );

        assert!(outcome.feed.feed.is_some());
    }

    #[test]
    fn test_idempotent_second_pass_produces_no_intents() {
        let first = reconcile(
            parsed_feed(vec![parsed_entry("1"), parsed_entry("2")]),
            None,
            &HashMap::new(),
            ts(200),
            ts(200),
        );
        assert_eq!(first.entries.len(), 2);

        // Build the stored state the first pass would have produced.
        let entry_priors: HashMap<String, EntryForUpdate> = first
            .entries
            .iter()
            .map(|(intent, _)| {
                (
                    intent.entry.id.clone(),
                    EntryForUpdate {
                        updated: intent.entry.updated,
                    },
                )
            })
            .collect();
        let p = prior(Some(ts(100)), false);

        let second = reconcile(
            parsed_feed(vec![parsed_entry("1"), parsed_entry("2")]),
            Some(&p),
            &entry_priors,
            ts(300),
            ts(300),
        );

        assert!(second.feed.feed.is_none());
        assert!(second.entries.is_empty());
        assert_eq!(second.unchanged, vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_newer_entry_is_modified_and_epoch_not_reassigned() {
        let mut entry = parsed_entry("1");
        entry.updated = Some(ts(150));

        let outcome = reconcile(
            parsed_feed(vec![entry]),
            Some(&prior(Some(ts(99)), false)),
            &priors(&[("1", 100)]),
            ts(200),
            ts(200),
        );

        assert_eq!(outcome.entries.len(), 1);
        let (intent, status) = &outcome.entries[0];
        assert_eq!(*status, EntryStatus::Modified);
        // None tells storage to keep the stored epoch.
        assert_eq!(intent.first_updated_epoch, None);
    }

    #[test]
    fn test_older_or_equal_entry_is_unchanged() {
        for seconds in [100, 101] {
            let outcome = reconcile(
                parsed_feed(vec![parsed_entry("1")]), // updated = ts(100)
                Some(&prior(Some(ts(99)), false)),
                &priors(&[("1", seconds)]),
                ts(200),
                ts(200),
            );
            assert!(outcome.entries.is_empty());
            assert_eq!(outcome.unchanged, vec!["1".to_string()]);
        }
    }

    #[test]
    fn test_stale_feed_forces_full_resync() {
        let outcome = reconcile(
            parsed_feed(vec![parsed_entry("1"), parsed_entry("2")]),
            Some(&prior(Some(ts(100)), true)),
            &priors(&[("1", 100), ("2", 500)]),
            ts(200),
            ts(200),
        );

        // Metadata written even though updated matches, and every stored
        // entry re-emitted as modified regardless of timestamps.
        assert!(outcome.feed.feed.is_some());
        assert_eq!(outcome.entries.len(), 2);
        for (_, status) in &outcome.entries {
            assert_eq!(*status, EntryStatus::Modified);
        }
    }

    #[test]
    fn test_published_promoted_when_updated_missing() {
        let mut entry = parsed_entry("1");
        entry.updated = None;
        entry.published = Some(ts(123));

        let outcome = reconcile(
            parsed_feed(vec![entry]),
            None,
            &HashMap::new(),
            ts(200),
            ts(200),
        );

        let (intent, _) = &outcome.entries[0];
        assert_eq!(intent.entry.updated, ts(123));
        assert_eq!(intent.entry.published, None);
    }

    #[test]
    fn test_updated_fabricated_from_batch_start_when_no_dates() {
        let mut entry = parsed_entry("1");
        entry.updated = None;
        entry.published = None;

        let outcome = reconcile(
            parsed_feed(vec![entry]),
            None,
            &HashMap::new(),
            ts(300),
            ts(250),
        );

        let (intent, _) = &outcome.entries[0];
        assert_eq!(intent.entry.updated, ts(250));
    }

    #[test]
    fn test_duplicate_ids_first_occurrence_wins() {
        let mut first = parsed_entry("1");
        first.title = Some("two".to_string());
        let mut dup = parsed_entry("1");
        dup.title = Some("one".to_string());

        let outcome = reconcile(
            parsed_feed(vec![first, dup]),
            None,
            &HashMap::new(),
            ts(200),
            ts(200),
        );

        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(outcome.entries[0].0.entry.title.as_deref(), Some("two"));
    }

    #[test]
    fn test_feed_order_follows_document_order() {
        let outcome = reconcile(
            parsed_feed(vec![parsed_entry("a"), parsed_entry("b"), parsed_entry("c")]),
            None,
            &HashMap::new(),
            ts(200),
            ts(200),
        );

        let orders: Vec<(String, usize)> = outcome
            .entries
            .iter()
            .map(|(i, _)| (i.entry.id.clone(), i.feed_order))
            .collect();
        assert_eq!(
            orders,
            vec![
                ("a".to_string(), 0),
                ("b".to_string(), 1),
                ("c".to_string(), 2)
            ]
        );
    }
}
