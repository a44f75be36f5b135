//! The public facade: owns the storage, the fetcher, and the hook
//! registries, and exposes feed management, updates, and the read-side
//! entry APIs.

use std::sync::{Arc, RwLock};

use futures::stream::Stream;

use crate::config::Config;
use crate::fetch::Fetcher;
use crate::storage::{EntryFilter, Storage, StorageError};
use crate::types::{Entry, EntryStatus, Feed, FeedRef};
use crate::update::{
    DynError, UpdateError, UpdateHooks, UpdatePipeline, UpdateResult, UpdatedEntry,
};
use crate::util::paginate;

/// A feed-reading backend bound to one database.
///
/// Cloning is cheap; clones share the same storage pool and hook
/// registries.
#[derive(Clone)]
pub struct Reader {
    storage: Storage,
    fetcher: Arc<Fetcher>,
    hooks: Arc<RwLock<UpdateHooks>>,
    max_workers: usize,
    chunk_size: usize,
}

impl Reader {
    pub fn new(storage: Storage, fetcher: Fetcher, config: &Config) -> Self {
        Self {
            storage,
            fetcher: Arc::new(fetcher),
            hooks: Arc::new(RwLock::new(UpdateHooks::new())),
            max_workers: config.max_workers.max(1),
            chunk_size: config.chunk_size,
        }
    }

    /// Direct access to the storage port (snapshots, intents, listings).
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    fn pipeline(&self) -> UpdatePipeline {
        UpdatePipeline {
            storage: self.storage.clone(),
            fetcher: self.fetcher.clone(),
            hooks: self.hooks.clone(),
            chunk_size: self.chunk_size,
        }
    }

    // ========================================================================
    // Feed Management
    // ========================================================================

    /// Register a feed. Its metadata and entries appear on the first
    /// successful update.
    pub async fn add_feed<'a>(&self, feed: impl Into<FeedRef<'a>>) -> Result<(), StorageError> {
        let url = feed.into();
        tracing::info!(url = %url.as_url(), "adding feed");
        self.storage.add_feed(url.as_url()).await
    }

    /// Delete a feed and all of its entries.
    pub async fn remove_feed<'a>(&self, feed: impl Into<FeedRef<'a>>) -> Result<(), StorageError> {
        let url = feed.into();
        tracing::info!(url = %url.as_url(), "removing feed");
        self.storage.remove_feed(url.as_url()).await
    }

    pub async fn get_feed<'a>(
        &self,
        feed: impl Into<FeedRef<'a>>,
    ) -> Result<Option<Feed>, StorageError> {
        self.storage.get_feed(feed.into().as_url()).await
    }

    pub async fn list_feeds(&self) -> Result<Vec<Feed>, StorageError> {
        self.storage.list_feeds().await
    }

    /// Set or clear the user's title override for a feed.
    pub async fn set_feed_user_title<'a>(
        &self,
        feed: impl Into<FeedRef<'a>>,
        title: Option<&str>,
    ) -> Result<(), StorageError> {
        self.storage
            .set_feed_user_title(feed.into().as_url(), title)
            .await
    }

    /// Force the next update of a feed to re-evaluate all entries.
    pub async fn set_feed_stale<'a>(
        &self,
        feed: impl Into<FeedRef<'a>>,
        stale: bool,
    ) -> Result<(), StorageError> {
        self.storage
            .set_feed_stale(feed.into().as_url(), stale)
            .await
    }

    // ========================================================================
    // Updates
    // ========================================================================

    /// Update a single feed synchronously, returning the entries that
    /// changed. Errors are returned directly.
    pub async fn update_feed<'a>(
        &self,
        feed: impl Into<FeedRef<'a>>,
    ) -> Result<Vec<UpdatedEntry>, UpdateError> {
        self.pipeline().update_feed(feed.into().as_url()).await
    }

    /// Update all stored feeds concurrently, yielding one result per
    /// feed as it completes (unordered).
    ///
    /// A `before_feeds` hook failure fails this call; an `after_feeds`
    /// hook failure surfaces as a final `Err` item. Every other item is
    /// `Ok` with the per-feed outcome inside.
    pub async fn update_feeds(
        &self,
    ) -> Result<impl Stream<Item = Result<UpdateResult, UpdateError>>, UpdateError> {
        self.pipeline().update_feeds(self.max_workers).await
    }

    // ========================================================================
    // Hook Registration
    // ========================================================================

    fn hooks_mut(&self) -> std::sync::RwLockWriteGuard<'_, UpdateHooks> {
        self.hooks.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn on_before_feeds<F>(&self, hook: F)
    where
        F: Fn() -> Result<(), DynError> + Send + Sync + 'static,
    {
        self.hooks_mut().on_before_feeds(hook);
    }

    pub fn on_before_feed<F>(&self, hook: F)
    where
        F: Fn(&str) -> Result<(), DynError> + Send + Sync + 'static,
    {
        self.hooks_mut().on_before_feed(hook);
    }

    pub fn on_after_entry<F>(&self, hook: F)
    where
        F: Fn(&str, &Entry, EntryStatus) -> Result<(), DynError> + Send + Sync + 'static,
    {
        self.hooks_mut().on_after_entry(hook);
    }

    pub fn on_after_feed<F>(&self, hook: F)
    where
        F: Fn(&str) -> Result<(), DynError> + Send + Sync + 'static,
    {
        self.hooks_mut().on_after_feed(hook);
    }

    pub fn on_after_feeds<F>(&self, hook: F)
    where
        F: Fn() -> Result<(), DynError> + Send + Sync + 'static,
    {
        self.hooks_mut().on_after_feeds(hook);
    }

    // ========================================================================
    // Entries (read side)
    // ========================================================================

    /// Stream entries, newest first, in pages of the configured chunk
    /// size. `limit = 0` means all of them.
    pub fn get_entries(
        &self,
        filter: EntryFilter,
        limit: usize,
    ) -> impl Stream<Item = Result<Entry, StorageError>> + '_ {
        let storage = self.storage.clone();
        paginate(
            move |size, last| {
                let storage = storage.clone();
                let filter = filter.clone();
                async move { storage.entries_page(&filter, size, last).await }
            },
            self.chunk_size,
            None,
            limit,
        )
    }

    pub async fn get_entry<'a>(
        &self,
        feed: impl Into<FeedRef<'a>>,
        id: &str,
    ) -> Result<Entry, StorageError> {
        self.storage.get_entry(feed.into().as_url(), id).await
    }

    pub async fn mark_entry_read<'a>(
        &self,
        feed: impl Into<FeedRef<'a>>,
        id: &str,
    ) -> Result<(), StorageError> {
        self.storage
            .set_entry_read(feed.into().as_url(), id, true)
            .await
    }

    pub async fn mark_entry_unread<'a>(
        &self,
        feed: impl Into<FeedRef<'a>>,
        id: &str,
    ) -> Result<(), StorageError> {
        self.storage
            .set_entry_read(feed.into().as_url(), id, false)
            .await
    }

    pub async fn mark_entry_important<'a>(
        &self,
        feed: impl Into<FeedRef<'a>>,
        id: &str,
    ) -> Result<(), StorageError> {
        self.storage
            .set_entry_important(feed.into().as_url(), id, true)
            .await
    }

    pub async fn mark_entry_unimportant<'a>(
        &self,
        feed: impl Into<FeedRef<'a>>,
        id: &str,
    ) -> Result<(), StorageError> {
        self.storage
            .set_entry_important(feed.into().as_url(), id, false)
            .await
    }
}
