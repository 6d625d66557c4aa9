use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::retry::millis;
use crate::cache::CacheKey;
use crate::render::SkeletonKind;

/// Default time-to-live for cached responses.
pub const DEFAULT_TTL: Duration = Duration::from_millis(60_000);

/// Receives loaded data along with the container it belongs to.
pub type UpdateCallback = Arc<dyn Fn(&Value, &str) + Send + Sync>;

/// Per-request loading options.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
  pub show_skeleton: bool,
  pub retry_on_error: bool,
  pub cache_key: Option<CacheKey>,
  #[serde(rename = "ttl_ms", with = "millis")]
  pub ttl: Duration,
  pub skeleton: SkeletonKind,
}

impl Default for LoadOptions {
  fn default() -> Self {
    Self {
      show_skeleton: true,
      retry_on_error: true,
      cache_key: None,
      ttl: DEFAULT_TTL,
      skeleton: SkeletonKind::Generic,
    }
  }
}

impl LoadOptions {
  pub fn cached(mut self, key: CacheKey, ttl: Duration) -> Self {
    self.cache_key = Some(key);
    self.ttl = ttl;
    self
  }

  pub fn with_skeleton(mut self, skeleton: SkeletonKind) -> Self {
    self.skeleton = skeleton;
    self
  }

  pub fn without_skeleton(mut self) -> Self {
    self.show_skeleton = false;
    self
  }

  pub fn without_retry(mut self) -> Self {
    self.retry_on_error = false;
    self
  }
}

/// One load of one endpoint into one container.
#[derive(Clone)]
pub struct LoadRequest {
  pub endpoint: String,
  pub container_id: String,
  pub update: UpdateCallback,
  pub options: LoadOptions,
}

impl LoadRequest {
  pub fn new<F>(endpoint: impl Into<String>, container_id: impl Into<String>, update: F) -> Self
  where
    F: Fn(&Value, &str) + Send + Sync + 'static,
  {
    Self {
      endpoint: endpoint.into(),
      container_id: container_id.into(),
      update: Arc::new(update),
      options: LoadOptions::default(),
    }
  }

  pub fn with_options(mut self, options: LoadOptions) -> Self {
    self.options = options;
    self
  }
}

impl fmt::Debug for LoadRequest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LoadRequest")
      .field("endpoint", &self.endpoint)
      .field("container_id", &self.container_id)
      .field("options", &self.options)
      .finish_non_exhaustive()
  }
}

/// How a single `load_data` call ended.
#[derive(Debug)]
pub enum LoadOutcome {
  /// Served from cache; no request was made
  Cached,
  /// Fetched and handed to the update callback
  Fetched,
  /// Failed and rescheduled; `next` resolves to the retried load's outcome
  Retrying {
    attempt: u32,
    delay: Duration,
    next: JoinHandle<LoadOutcome>,
  },
  /// Gave up; an error block was rendered
  Failed { message: String },
  /// A newer load of the same container took over
  Superseded,
}

impl LoadOutcome {
  /// Follow scheduled retries to the final outcome.
  pub async fn settle(self) -> LoadOutcome {
    let mut outcome = self;
    loop {
      match outcome {
        LoadOutcome::Retrying { next, .. } => {
          outcome = next.await.unwrap_or_else(|e| LoadOutcome::Failed {
            message: format!("Retry task failed: {}", e),
          });
        }
        settled => return settled,
      }
    }
  }

  pub fn label(&self) -> &'static str {
    match self {
      LoadOutcome::Cached => "cached",
      LoadOutcome::Fetched => "fetched",
      LoadOutcome::Retrying { .. } => "retrying",
      LoadOutcome::Failed { .. } => "failed",
      LoadOutcome::Superseded => "superseded",
    }
  }
}
