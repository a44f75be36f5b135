//! The normalizer: turns a raw retrieved document into a [`ParsedFeed`]
//! with canonical metadata and entries in document order.
//!
//! Parsing is delegated to `feed-rs`, which handles RSS 0.x/1.0/2.0,
//! Atom, and JSON Feed behind one model. Per-entry oddities (unparsable
//! enclosure attributes, missing ids) degrade field by field; a single
//! bad value never fails the entry, let alone the document.

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::{Content, Enclosure, Feed, ParsedEntry, ParsedFeed};

/// Fatal parse failure: the document is not recognizable as any
/// supported feed format.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed feed document: {0}")]
    Malformed(#[from] feed_rs::parser::ParseFeedError),
}

/// Parses a retrieved document into a [`ParsedFeed`].
///
/// The caching tokens on the result are left empty; the update pipeline
/// fills them in from the retrieval.
///
/// # Errors
///
/// Returns [`ParseError::Malformed`] when the document cannot be parsed
/// as RSS, Atom, or JSON Feed.
pub fn parse_feed(url: &str, bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    // Transcoding from a declared non-UTF-8 encoding is handled inside
    // the parser; worth a trace when it happens, not an error.
    if std::str::from_utf8(bytes).is_err() {
        tracing::warn!(url = %url, "document is not valid UTF-8, relying on parser transcoding");
    }

    let parsed = feed_rs::parser::parse(bytes)?;

    let mut feed = Feed::new(url);
    // RSS only has one date on the channel; either serves as "updated".
    feed.updated = parsed.updated.or(parsed.published);
    feed.title = parsed.title.map(|t| t.content);
    feed.link = parsed.links.first().map(|l| l.href.clone());
    feed.author = parsed.authors.first().map(|a| a.name.clone());

    let entries = parsed
        .entries
        .into_iter()
        .map(make_entry)
        .collect();

    Ok(ParsedFeed {
        feed,
        entries,
        http_etag: None,
        http_last_modified: None,
    })
}

fn make_entry(entry: feed_rs::model::Entry) -> ParsedEntry {
    let link = entry.links.first().map(|l| l.href.clone());
    let title = entry.title.map(|t| t.content);
    let author = entry.authors.first().map(|a| a.name.clone());
    let summary = entry.summary.map(|t| t.content);

    let mut content = Vec::new();
    if let Some(c) = entry.content {
        let media_type = Some(c.content_type.to_string());
        if let Some(value) = c.body {
            content.push(Content {
                value,
                media_type,
                language: None,
            });
        }
    }

    let mut enclosures = Vec::new();
    for media in entry.media {
        for item in media.content {
            // No URL means nothing to attach; the rest of the fields are
            // optional and simply absent when unparsable.
            if let Some(url) = item.url {
                enclosures.push(Enclosure {
                    href: url.to_string(),
                    media_type: item.content_type.map(|m| m.to_string()),
                    length: item.size,
                });
            }
        }
    }

    let id = resolve_id(
        &entry.id,
        link.as_deref(),
        title.as_deref(),
        entry.published.map(|d| d.timestamp()),
    );

    ParsedEntry {
        id,
        updated: entry.updated,
        published: entry.published,
        title,
        link,
        author,
        summary,
        content,
        enclosures,
    }
}

/// Uses the document-supplied id when present; otherwise derives a
/// stable one from the entry's link, title, and publication date.
fn resolve_id(
    existing: &str,
    link: Option<&str>,
    title: Option<&str>,
    published: Option<i64>,
) -> String {
    let trimmed = existing.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }

    let input = format!(
        "{}|{}|{}",
        link.unwrap_or(""),
        title.unwrap_or(""),
        published.map(|p| p.to_string()).unwrap_or_default()
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}
