//! riffle: a self-hosted feed reader backend.
//!
//! Feeds (RSS/Atom/JSON Feed) are fetched with conditional HTTP,
//! normalized, and incrementally reconciled into a SQLite database.
//! User state (read/important flags, title overrides) survives
//! re-fetches; updates run concurrently with per-feed failure isolation
//! and ordered extensibility hooks.
//!
//! The [`Reader`] facade is the entry point:
//!
//! ```no_run
//! use riffle::config::Config;
//! use riffle::fetch::Fetcher;
//! use riffle::storage::Storage;
//! use riffle::Reader;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::default();
//! let storage = Storage::open(&config.database).await?;
//! let fetcher = Fetcher::new(config.fetch_config())?;
//! let reader = Reader::new(storage, fetcher, &config);
//!
//! reader.add_feed("https://example.com/feed.xml").await?;
//! let updated = reader.update_feed("https://example.com/feed.xml").await?;
//! println!("{} entries changed", updated.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod fetch;
pub mod parse;
mod reader;
pub mod storage;
pub mod types;
pub mod update;
pub mod util;

pub use reader::Reader;
pub use types::{Entry, EntryStatus, Feed, FeedRef};
pub use update::{
    DynError, HookError, HookStage, UpdateError, UpdateHooks, UpdateResult, UpdatedEntry,
};
