//! Observer registries invoked around feed and batch updates.
//!
//! Five hook kinds, each an append-only ordered list of callables invoked
//! in registration order:
//!
//! - `before_feeds()`: once, before any feed is dispatched to the pool
//! - `before_feed(url)`: per feed, before its retrieval starts
//! - `after_entry(url, entry, status)`: per new/modified entry, in
//!   document order, after the entry was persisted
//! - `after_feed(url)`: per feed, after its update finished (or failed)
//! - `after_feeds()`: once, after every feed has completed
//!
//! An error from a per-feed hook aborts only that feed's remaining
//! processing; an error from a batch hook is fatal to the whole update
//! operation. The distinction is enforced by the caller in
//! [`crate::update`], not here; this module only reports which stage
//! failed.

use std::fmt;

use thiserror::Error;

use crate::types::{Entry, EntryStatus};

/// Errors returned by user-registered hooks.
pub type DynError = Box<dyn std::error::Error + Send + Sync + 'static>;

type BatchHook = Box<dyn Fn() -> Result<(), DynError> + Send + Sync>;
type FeedHook = Box<dyn Fn(&str) -> Result<(), DynError> + Send + Sync>;
type EntryHook = Box<dyn Fn(&str, &Entry, EntryStatus) -> Result<(), DynError> + Send + Sync>;

/// Which hook kind produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    BeforeFeeds,
    BeforeFeed,
    AfterEntry,
    AfterFeed,
    AfterFeeds,
}

impl HookStage {
    /// Batch-level hooks are fatal to the whole update operation;
    /// per-feed hooks abort only the feed they ran for.
    pub fn is_batch(&self) -> bool {
        matches!(self, HookStage::BeforeFeeds | HookStage::AfterFeeds)
    }
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookStage::BeforeFeeds => "before_feeds",
            HookStage::BeforeFeed => "before_feed",
            HookStage::AfterEntry => "after_entry",
            HookStage::AfterFeed => "after_feed",
            HookStage::AfterFeeds => "after_feeds",
        };
        f.write_str(name)
    }
}

/// A hook failure, tagged with the stage it happened in. The original
/// error is preserved as the source.
#[derive(Debug, Error)]
#[error("{stage} hook failed")]
pub struct HookError {
    pub stage: HookStage,
    #[source]
    pub source: DynError,
}

/// The five hook registries.
///
/// Registration order is invocation order. Dispatch stops at the first
/// failing hook of a kind.
#[derive(Default)]
pub struct UpdateHooks {
    before_feeds: Vec<BatchHook>,
    before_feed: Vec<FeedHook>,
    after_entry: Vec<EntryHook>,
    after_feed: Vec<FeedHook>,
    after_feeds: Vec<BatchHook>,
}

impl UpdateHooks {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    pub fn on_before_feeds<F>(&mut self, hook: F)
    where
        F: Fn() -> Result<(), DynError> + Send + Sync + 'static,
    {
        self.before_feeds.push(Box::new(hook));
    }

    pub fn on_before_feed<F>(&mut self, hook: F)
    where
        F: Fn(&str) -> Result<(), DynError> + Send + Sync + 'static,
    {
        self.before_feed.push(Box::new(hook));
    }

    pub fn on_after_entry<F>(&mut self, hook: F)
    where
        F: Fn(&str, &Entry, EntryStatus) -> Result<(), DynError> + Send + Sync + 'static,
    {
        self.after_entry.push(Box::new(hook));
    }

    pub fn on_after_feed<F>(&mut self, hook: F)
    where
        F: Fn(&str) -> Result<(), DynError> + Send + Sync + 'static,
    {
        self.after_feed.push(Box::new(hook));
    }

    pub fn on_after_feeds<F>(&mut self, hook: F)
    where
        F: Fn() -> Result<(), DynError> + Send + Sync + 'static,
    {
        self.after_feeds.push(Box::new(hook));
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    pub(crate) fn run_before_feeds(&self) -> Result<(), HookError> {
        run_batch(&self.before_feeds, HookStage::BeforeFeeds)
    }

    pub(crate) fn run_after_feeds(&self) -> Result<(), HookError> {
        run_batch(&self.after_feeds, HookStage::AfterFeeds)
    }

    pub(crate) fn run_before_feed(&self, url: &str) -> Result<(), HookError> {
        run_feed(&self.before_feed, HookStage::BeforeFeed, url)
    }

    pub(crate) fn run_after_feed(&self, url: &str) -> Result<(), HookError> {
        run_feed(&self.after_feed, HookStage::AfterFeed, url)
    }

    pub(crate) fn run_after_entry(
        &self,
        url: &str,
        entry: &Entry,
        status: EntryStatus,
    ) -> Result<(), HookError> {
        for hook in &self.after_entry {
            hook(url, entry, status).map_err(|source| HookError {
                stage: HookStage::AfterEntry,
                source,
            })?;
        }
        Ok(())
    }
}

impl fmt::Debug for UpdateHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateHooks")
            .field("before_feeds", &self.before_feeds.len())
            .field("before_feed", &self.before_feed.len())
            .field("after_entry", &self.after_entry.len())
            .field("after_feed", &self.after_feed.len())
            .field("after_feeds", &self.after_feeds.len())
            .finish()
    }
}

fn run_batch(hooks: &[BatchHook], stage: HookStage) -> Result<(), HookError> {
    for hook in hooks {
        hook().map_err(|source| HookError { stage, source })?;
    }
    Ok(())
}

fn run_feed(hooks: &[FeedHook], stage: HookStage, url: &str) -> Result<(), HookError> {
    for hook in hooks {
        hook(url).map_err(|source| HookError { stage, source })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use chrono::TimeZone;
    use chrono::Utc;

    fn entry() -> Entry {
        Entry {
            feed_url: "https://example.com/feed".to_string(),
            id: "1".to_string(),
            updated: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            published: None,
            title: None,
            link: None,
            author: None,
            summary: None,
            content: vec![],
            enclosures: vec![],
            read: false,
            important: false,
        }
    }

    #[test]
    fn test_hooks_run_in_registration_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = UpdateHooks::new();

        for name in ["first", "second", "third"] {
            let calls = calls.clone();
            hooks.on_before_feed(move |url| {
                calls.lock().unwrap().push(format!("{name}:{url}"));
                Ok(())
            });
        }

        hooks.run_before_feed("u").unwrap();
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["first:u", "second:u", "third:u"]
        );
    }

    #[test]
    fn test_first_error_stops_remaining_hooks() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = UpdateHooks::new();

        {
            let calls = calls.clone();
            hooks.on_after_feed(move |_| {
                calls.lock().unwrap().push("ran");
                Err("boom".into())
            });
        }
        {
            let calls = calls.clone();
            hooks.on_after_feed(move |_| {
                calls.lock().unwrap().push("should not run");
                Ok(())
            });
        }

        let err = hooks.run_after_feed("u").unwrap_err();
        assert_eq!(err.stage, HookStage::AfterFeed);
        assert_eq!(err.source.to_string(), "boom");
        assert_eq!(*calls.lock().unwrap(), vec!["ran"]);
    }

    #[test]
    fn test_after_entry_receives_status() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = UpdateHooks::new();

        {
            let seen = seen.clone();
            hooks.on_after_entry(move |url, entry, status| {
                seen.lock()
                    .unwrap()
                    .push((url.to_string(), entry.id.clone(), status));
                Ok(())
            });
        }

        hooks
            .run_after_entry("https://example.com/feed", &entry(), EntryStatus::New)
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].2, EntryStatus::New);
    }

    #[test]
    fn test_batch_stage_classification() {
        assert!(HookStage::BeforeFeeds.is_batch());
        assert!(HookStage::AfterFeeds.is_batch());
        assert!(!HookStage::BeforeFeed.is_batch());
        assert!(!HookStage::AfterEntry.is_batch());
        assert!(!HookStage::AfterFeed.is_batch());
    }

    #[test]
    fn test_empty_registries_are_noops() {
        let hooks = UpdateHooks::new();
        hooks.run_before_feeds().unwrap();
        hooks.run_before_feed("u").unwrap();
        hooks.run_after_feed("u").unwrap();
        hooks.run_after_feeds().unwrap();
    }
}
