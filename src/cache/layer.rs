//! TTL cache over a namespaced region of cache storage.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::key::{CacheKey, NAMESPACE};
use super::storage::CacheStorage;
use crate::clock::{Clock, SystemClock};

/// Default bound on the number of namespaced entries.
pub const DEFAULT_MAX_ENTRIES: usize = 256;

/// Persisted form of a cached value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub data: Value,
  /// Write time, epoch milliseconds
  pub timestamp: i64,
}

impl CacheEntry {
  /// An entry is valid while its age does not exceed `ttl`.
  ///
  /// A timestamp too far from `now` to compute an age counts as stale.
  pub fn is_fresh(&self, now: i64, ttl: Duration) -> bool {
    let ttl = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    match now.checked_sub(self.timestamp) {
      Some(age) => age <= ttl,
      None => false,
    }
  }
}

/// Key/value cache with per-read TTL and a bounded entry count.
///
/// Stale entries are removed when read, never swept. Every failure degrades
/// to a miss (reads) or a skipped write (writes).
pub struct TtlCache<S: CacheStorage> {
  storage: Arc<S>,
  clock: Arc<dyn Clock>,
  max_entries: usize,
}

impl<S: CacheStorage> TtlCache<S> {
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
      clock: Arc::new(SystemClock),
      max_entries: DEFAULT_MAX_ENTRIES,
    }
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn with_max_entries(mut self, max_entries: usize) -> Self {
    self.max_entries = max_entries.max(1);
    self
  }

  /// Underlying storage, shared with anything else that writes to it.
  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Read a value if present and no older than `ttl`.
  pub fn get(&self, key: &CacheKey, ttl: Duration) -> Option<Value> {
    let storage_key = key.storage_key();

    let raw = match self.storage.get(&storage_key) {
      Ok(Some(raw)) => raw,
      Ok(None) => return None,
      Err(e) => {
        warn!("Cache read error for {}: {}", key, e);
        return None;
      }
    };

    let entry: CacheEntry = match serde_json::from_str(&raw) {
      Ok(entry) => entry,
      Err(e) => {
        debug!("Unreadable cache entry for {}: {}", key, e);
        return None;
      }
    };

    let now = self.clock.now_millis();
    if !entry.is_fresh(now, ttl) {
      debug!("Cache entry for {} expired", key);
      if let Err(e) = self.storage.remove(&storage_key) {
        warn!("Failed to remove stale cache entry {}: {}", key, e);
      }
      return None;
    }

    debug!(
      "Cache HIT for {} (age: {}s)",
      key,
      now.saturating_sub(entry.timestamp) / 1000
    );
    Some(entry.data)
  }

  /// Write a value stamped with the current time. Never fails.
  pub fn set(&self, key: &CacheKey, data: &Value) {
    let entry = CacheEntry {
      data: data.clone(),
      timestamp: self.clock.now_millis(),
    };

    let raw = match serde_json::to_string(&entry) {
      Ok(raw) => raw,
      Err(e) => {
        warn!("Cache write error for {}: {}", key, e);
        return;
      }
    };

    if let Err(e) = self.storage.set(&key.storage_key(), &raw) {
      warn!("Cache write error for {}: {}", key, e);
      return;
    }
    debug!("Cached data for {}", key);

    self.evict_overflow();
  }

  /// Remove every namespaced entry, returning how many were removed.
  pub fn clear(&self) -> usize {
    let keys = match self.storage.keys(NAMESPACE) {
      Ok(keys) => keys,
      Err(e) => {
        warn!("Cache clear error: {}", e);
        return 0;
      }
    };

    let removed = keys
      .iter()
      .filter(|k| match self.storage.remove(k) {
        Ok(()) => true,
        Err(e) => {
          warn!("Failed to remove cache entry {}: {}", k, e);
          false
        }
      })
      .count();

    debug!("Cleared {} cached items", removed);
    removed
  }

  /// Number of namespaced entries currently stored.
  pub fn entry_count(&self) -> usize {
    self.storage.keys(NAMESPACE).map(|k| k.len()).unwrap_or(0)
  }

  /// Evict the oldest entries once the bound is exceeded. Unreadable entries
  /// go first.
  fn evict_overflow(&self) {
    let keys = match self.storage.keys(NAMESPACE) {
      Ok(keys) if keys.len() > self.max_entries => keys,
      Ok(_) => return,
      Err(e) => {
        warn!("Failed to list cache entries for eviction: {}", e);
        return;
      }
    };

    let mut aged: Vec<(i64, String)> = keys
      .into_iter()
      .map(|k| {
        let timestamp = self
          .storage
          .get(&k)
          .ok()
          .flatten()
          .and_then(|raw| serde_json::from_str::<CacheEntry>(&raw).ok())
          .map(|entry| entry.timestamp)
          .unwrap_or(i64::MIN);
        (timestamp, k)
      })
      .collect();
    aged.sort();

    let overflow = aged.len() - self.max_entries;
    for (_, k) in aged.into_iter().take(overflow) {
      match CacheKey::from_storage_key(&k) {
        Some(key) => debug!("Evicting cache entry {}", key),
        None => debug!("Evicting unrecognized cache entry {}", k),
      }
      if let Err(e) = self.storage.remove(&k) {
        warn!("Failed to evict cache entry {}: {}", k, e);
      }
    }
  }
}

impl<S: CacheStorage> Clone for TtlCache<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      clock: Arc::clone(&self.clock),
      max_entries: self.max_entries,
    }
  }
}
