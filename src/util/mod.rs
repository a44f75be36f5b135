//! Shared utilities with no domain knowledge of feeds or entries.

mod paginate;

pub use paginate::paginate;
