//! Typed cache keys with a bounded key space.

use color_eyre::{eyre::eyre, Report, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt;

/// Prefix for every entry the loader writes to cache storage.
pub const NAMESPACE: &str = "progressive_cache_";

/// Longest key accepted, excluding the namespace prefix.
pub const MAX_KEY_LEN: usize = 128;

/// Length of the hex digest used for keys derived from endpoints.
const DERIVED_KEY_LEN: usize = 16;

/// A validated cache key.
///
/// Keys are 1 to 128 characters of `[A-Za-z0-9_.:-]`, so two logical caches
/// only collide when they deliberately pick the same name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub struct CacheKey(String);

impl CacheKey {
  pub fn new(key: impl Into<String>) -> Result<Self> {
    let key = key.into();

    if key.is_empty() {
      return Err(eyre!("Cache key must not be empty"));
    }
    if key.len() > MAX_KEY_LEN {
      return Err(eyre!(
        "Cache key '{}...' exceeds {} characters",
        key.chars().take(16).collect::<String>(),
        MAX_KEY_LEN
      ));
    }
    if let Some(bad) = key
      .chars()
      .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-')))
    {
      return Err(eyre!("Cache key '{}' contains invalid character {:?}", key, bad));
    }

    Ok(Self(key))
  }

  /// Derive a stable key from an endpoint (SHA-256, hex, truncated).
  pub fn derived(endpoint: &str) -> Self {
    let mut hasher = Sha256::new();
    hasher.update(endpoint.trim().as_bytes());
    let digest = hex::encode(hasher.finalize());
    Self(format!("ep-{}", &digest[..DERIVED_KEY_LEN]))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Full key as written to storage.
  pub fn storage_key(&self) -> String {
    format!("{}{}", NAMESPACE, self.0)
  }

  /// Recover a key from a storage key, if it belongs to the namespace.
  pub fn from_storage_key(storage_key: &str) -> Option<Self> {
    storage_key
      .strip_prefix(NAMESPACE)
      .and_then(|k| Self::new(k).ok())
  }
}

impl TryFrom<String> for CacheKey {
  type Error = Report;

  fn try_from(value: String) -> Result<Self> {
    Self::new(value)
  }
}

impl std::str::FromStr for CacheKey {
  type Err = Report;

  fn from_str(s: &str) -> Result<Self> {
    Self::new(s)
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}
