//! The update engine: retrieve → normalize → reconcile → persist →
//! dispatch hooks, for one feed or for every stored feed concurrently.
//!
//! Failure isolation is the point of this module. Everything that can go
//! wrong for one feed (transport, parsing, storage, a per-feed hook)
//! is caught at the worker boundary and recorded as that feed's result;
//! other feeds are never affected. Only the batch-level hooks
//! (`before_feeds`/`after_feeds`) are fatal to a whole `update_feeds`
//! run.

mod hooks;
mod pool;
mod reconcile;

pub use hooks::{DynError, HookError, HookStage, UpdateHooks};

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard};

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use thiserror::Error;

use crate::fetch::{FetchError, Fetcher, Retrieved};
use crate::parse::{self, ParseError};
use crate::storage::{Storage, StorageError};
use crate::types::{Entry, EntryForUpdate, EntryStatus};
use crate::util::paginate;

// ============================================================================
// Results and Errors
// ============================================================================

/// An entry the update wrote, and whether it was newly created.
#[derive(Debug)]
pub struct UpdatedEntry {
    pub entry: Entry,
    pub new: bool,
}

/// The per-feed result of an update batch: one per feed attempted,
/// success or error.
#[derive(Debug)]
pub struct UpdateResult {
    pub url: String,
    pub outcome: Result<Vec<UpdatedEntry>, UpdateError>,
}

/// Why one feed's update failed.
///
/// `NotModified` is deliberately absent: a 304 is not an error, it
/// short-circuits to a successful zero-change result.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// The URL is not stored; add the feed first.
    #[error("unknown feed: {0}")]
    FeedNotFound(String),
    /// Transport failure while retrieving the document.
    #[error("retrieve error: {0}")]
    Retrieve(#[from] FetchError),
    /// The document could not be parsed as a feed.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    /// Reading snapshots or writing intents failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    /// A user hook failed. Per-feed stages abort only their feed;
    /// batch stages abort the whole operation.
    #[error("hook error: {0}")]
    Hook(#[from] HookError),
}

// ============================================================================
// Pipeline
// ============================================================================

/// One update run's view of the world. Cheap to clone: every worker task
/// gets its own copy.
#[derive(Clone)]
pub(crate) struct UpdatePipeline {
    pub(crate) storage: Storage,
    pub(crate) fetcher: Arc<Fetcher>,
    pub(crate) hooks: Arc<RwLock<UpdateHooks>>,
    /// Page size for the stored-entry scans; 0 disables chunking.
    pub(crate) chunk_size: usize,
}

impl UpdatePipeline {
    fn hooks(&self) -> RwLockReadGuard<'_, UpdateHooks> {
        // A poisoned lock only means a hook panicked elsewhere; the
        // registries themselves are still usable.
        self.hooks.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Update a single feed, bracketed as a batch of one. The feed's own
    /// error is returned directly; there are no other feeds to protect.
    pub(crate) async fn update_feed(
        &self,
        url: &str,
    ) -> Result<Vec<UpdatedEntry>, UpdateError> {
        self.hooks().run_before_feeds()?;
        let batch_start = Utc::now();
        let result = self.update_one(url.to_string(), batch_start).await;
        let after = self.hooks().run_after_feeds();

        match (result.outcome, after) {
            (Err(feed_error), _) => Err(feed_error),
            (Ok(entries), Ok(())) => Ok(entries),
            (Ok(_), Err(hook_error)) => Err(hook_error.into()),
        }
    }

    /// Update every stored feed with at most `max_workers` in flight,
    /// yielding one [`UpdateResult`] per feed as each completes
    /// (unordered).
    ///
    /// `before_feeds` runs before anything is dispatched; its failure
    /// fails this call. `after_feeds` runs after the last feed; its
    /// failure surfaces as a final `Err` item of the stream. All other
    /// items are `Ok`; per-feed failures live inside the result.
    pub(crate) async fn update_feeds(
        self,
        max_workers: usize,
    ) -> Result<impl Stream<Item = Result<UpdateResult, UpdateError>>, UpdateError> {
        self.hooks().run_before_feeds()?;

        let urls = self.storage.feed_urls().await?;
        let batch_start = Utc::now();
        tracing::info!(feeds = urls.len(), workers = max_workers, "updating feeds");

        let worker_pipeline = self.clone();
        let results = pool::map_unordered(urls, max_workers, move |url| {
            let pipeline = worker_pipeline.clone();
            async move { pipeline.update_one(url, batch_start).await }
        })
        .map(Ok);

        let tail = stream::once(async move {
            self.hooks().run_after_feeds().map_err(UpdateError::from)
        })
        .filter_map(|result| async move { result.err().map(Err) });

        Ok(results.chain(tail))
    }

    /// The per-feed worker: hooks bracket the pipeline even when it
    /// fails, so observers get visibility into failed attempts. A hook
    /// error aborts this feed's remaining processing; whichever error
    /// happened first is the one recorded.
    async fn update_one(&self, url: String, batch_start: DateTime<Utc>) -> UpdateResult {
        let outcome = self.update_one_guarded(&url, batch_start).await;

        match &outcome {
            Ok(entries) => {
                let new = entries.iter().filter(|e| e.new).count();
                tracing::info!(
                    url = %url,
                    new = new,
                    modified = entries.len() - new,
                    "feed updated"
                );
            }
            Err(error) => {
                tracing::warn!(url = %url, error = %error, "feed update failed");
            }
        }

        UpdateResult { url, outcome }
    }

    async fn update_one_guarded(
        &self,
        url: &str,
        batch_start: DateTime<Utc>,
    ) -> Result<Vec<UpdatedEntry>, UpdateError> {
        self.hooks().run_before_feed(url)?;

        let result = self.run_pipeline(url, batch_start).await;

        // after_entry only fires for entries that were actually written.
        let result = match result {
            Ok(entries) => self.dispatch_entry_hooks(url, entries),
            Err(error) => Err(error),
        };

        // after_feed fires around failures too; a pipeline error that
        // already happened takes precedence over a hook error here.
        let after = self.hooks().run_after_feed(url);
        match (result, after) {
            (Err(pipeline_error), _) => Err(pipeline_error),
            (Ok(entries), Ok(())) => Ok(entries),
            (Ok(_), Err(hook_error)) => Err(hook_error.into()),
        }
    }

    fn dispatch_entry_hooks(
        &self,
        url: &str,
        entries: Vec<UpdatedEntry>,
    ) -> Result<Vec<UpdatedEntry>, UpdateError> {
        for updated in &entries {
            let status = if updated.new {
                EntryStatus::New
            } else {
                EntryStatus::Modified
            };
            self.hooks().run_after_entry(url, &updated.entry, status)?;
        }
        Ok(entries)
    }

    /// retrieve → parse → load priors → reconcile → persist.
    async fn run_pipeline(
        &self,
        url: &str,
        batch_start: DateTime<Utc>,
    ) -> Result<Vec<UpdatedEntry>, UpdateError> {
        let now = Utc::now();

        let prior = self
            .storage
            .get_feed_for_update(url)
            .await?
            .ok_or_else(|| UpdateError::FeedNotFound(url.to_string()))?;

        let retrieved = self
            .fetcher
            .retrieve(
                url,
                prior.http_etag.as_deref(),
                prior.http_last_modified.as_deref(),
            )
            .await?;

        let (bytes, etag, last_modified) = match retrieved {
            Retrieved::NotModified => {
                tracing::debug!(url = %url, "not modified, nothing to do");
                return Ok(Vec::new());
            }
            Retrieved::Document {
                bytes,
                etag,
                last_modified,
            } => (bytes, etag, last_modified),
        };

        let mut parsed = parse::parse_feed(url, &bytes)?;
        parsed.http_etag = etag;
        parsed.http_last_modified = last_modified;

        let entry_priors = self.load_entry_priors(url).await?;

        let outcome = reconcile::reconcile(parsed, Some(&prior), &entry_priors, now, batch_start);
        tracing::debug!(
            url = %url,
            changed = outcome.entries.len(),
            unchanged = outcome.unchanged.len(),
            "reconciled"
        );

        let (intents, statuses): (Vec<_>, Vec<_>) = outcome.entries.into_iter().unzip();
        self.storage.apply_update(&outcome.feed, &intents).await?;

        Ok(intents
            .into_iter()
            .zip(statuses)
            .map(|(intent, status)| UpdatedEntry {
                entry: intent.entry,
                new: status == EntryStatus::New,
            })
            .collect())
    }

    /// Streams the stored per-entry snapshots for a feed into a map,
    /// `chunk_size` rows at a time, so a huge feed is never materialized
    /// in one storage call.
    async fn load_entry_priors(
        &self,
        url: &str,
    ) -> Result<HashMap<String, EntryForUpdate>, StorageError> {
        let storage = self.storage.clone();
        let url = url.to_string();
        let pages = paginate(
            move |size, last| {
                let storage = storage.clone();
                let url = url.clone();
                async move { storage.entries_for_update_page(&url, size, last).await }
            },
            self.chunk_size,
            None,
            0,
        );

        futures::pin_mut!(pages);
        let mut priors = HashMap::new();
        while let Some(item) = pages.next().await {
            let (id, snapshot) = item?;
            priors.insert(id, snapshot);
        }
        Ok(priors)
    }
}
