//! Persistent state on SQLite, via sqlx.
//!
//! This is the storage port the update engine writes through: it exposes
//! the update-relevant snapshots ([`crate::types::FeedForUpdate`],
//! [`crate::types::EntryForUpdate`]), accepts write intents, and owns the
//! read-side listing queries. Reconciliation semantics live in
//! [`crate::update`]; nothing here decides *whether* to write, only how.

mod db;
mod entries;
mod feeds;
mod types;

pub use db::Storage;
pub use types::{EntryCursor, EntryFilter, StorageError};
