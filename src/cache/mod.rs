//! Persistent client-side cache for loaded data.
//!
//! This module provides:
//! - A flat key/value [`CacheStorage`] trait with SQLite, memory and no-op backends
//! - Validated [`CacheKey`]s living under a fixed storage namespace
//! - A [`TtlCache`] that expires entries on read and bounds its entry count

mod key;
mod layer;
mod storage;

pub use key::{CacheKey, NAMESPACE};
pub use layer::{CacheEntry, TtlCache, DEFAULT_MAX_ENTRIES};
pub use storage::{CacheStorage, MemoryStorage, NoopStorage, SqliteStorage};
