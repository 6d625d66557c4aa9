//! Progressive data loading into named containers.
//!
//! A load shows a skeleton immediately, serves from the TTL cache when it
//! can, and otherwise fetches the endpoint with a loading indicator, retrying
//! failures with exponential backoff before rendering an inline error.
//!
//! # Example
//!
//! ```ignore
//! let loader = ProgressiveLoader::new(fetcher, surface, cache, RetryPolicy::default());
//!
//! let request = LoadRequest::new("/api/members", "members", |data, container| {
//!     render_members(container, data);
//! })
//! .with_options(LoadOptions::default().cached(key, Duration::from_secs(30)));
//!
//! let outcome = loader.load_data(request).await.settle().await;
//! ```

mod batch;
mod request;
mod retry;
mod tracker;

pub use batch::BatchSummary;
pub use request::{LoadOptions, LoadOutcome, LoadRequest, UpdateCallback, DEFAULT_TTL};
pub use retry::{RetryDecision, RetryPolicy, RetryTracker};
pub use tracker::{LoadTicket, LoadingTracker};

pub(crate) use retry::millis;

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::cache::{CacheStorage, TtlCache};
use crate::fetch::Fetcher;
use crate::render::{Block, ErrorBlock, RetryAction, SkeletonKind, Surface};

struct Inner<S: CacheStorage> {
  fetcher: Arc<dyn Fetcher>,
  surface: Arc<dyn Surface>,
  cache: TtlCache<S>,
  retries: RetryTracker,
  tracker: LoadingTracker,
  /// Last request that gave up, per container
  failed: Mutex<HashMap<String, LoadRequest>>,
}

/// Loads endpoints into containers with caching, retries and indicators.
///
/// Cloning is cheap and clones share all state. Independent loaders share
/// nothing but whatever cache storage they were given.
pub struct ProgressiveLoader<S: CacheStorage> {
  inner: Arc<Inner<S>>,
}

impl<S: CacheStorage + 'static> ProgressiveLoader<S> {
  pub fn new(
    fetcher: Arc<dyn Fetcher>,
    surface: Arc<dyn Surface>,
    cache: TtlCache<S>,
    policy: RetryPolicy,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        fetcher,
        surface,
        cache,
        retries: RetryTracker::new(policy),
        tracker: LoadingTracker::new(),
        failed: Mutex::new(HashMap::new()),
      }),
    }
  }

  /// Load `request.endpoint` into `request.container_id`.
  ///
  /// Resolves once the data is rendered, an error is rendered, or a retry is
  /// scheduled. Use [`LoadOutcome::settle`] to wait for retries too.
  pub fn load_data(&self, request: LoadRequest) -> BoxFuture<'static, LoadOutcome> {
    let this = self.clone();
    Box::pin(async move { this.run(request).await })
  }

  /// Whether `container` has a load in progress.
  pub fn is_loading(&self, container: &str) -> bool {
    self.inner.tracker.is_loading(container)
  }

  /// Retries made so far for `endpoint`.
  pub fn retry_attempts(&self, endpoint: &str) -> u32 {
    self.inner.retries.attempts(endpoint)
  }

  /// Re-issue the load that last gave up in `container`, starting its
  /// endpoint's backoff from scratch.
  pub fn retry_failed(&self, container: &str) -> Option<BoxFuture<'static, LoadOutcome>> {
    let request = self.failed().remove(container)?;
    info!(
      "Manual retry of {} into {}",
      request.endpoint, request.container_id
    );
    self.inner.retries.reset(&request.endpoint);
    Some(self.load_data(request))
  }

  /// Drop loading flags, indicators and retry counters.
  ///
  /// Loads in flight keep running; they just no longer count as tracked.
  pub fn reset(&self) {
    self.inner.tracker.clear();
    self.inner.retries.clear();
  }

  /// Remove all cached responses, returning how many were removed.
  pub fn clear_cache(&self) -> usize {
    let removed = self.inner.cache.clear();
    info!("Cleared {} cached items", removed);
    removed
  }

  pub fn cache(&self) -> &TtlCache<S> {
    &self.inner.cache
  }

  async fn run(&self, request: LoadRequest) -> LoadOutcome {
    let container = request.container_id.as_str();
    let options = &request.options;

    if options.show_skeleton {
      self.show_skeleton(container, options.skeleton);
    }

    let ticket = self.inner.tracker.begin(container);

    if let Some(key) = &options.cache_key {
      if let Some(data) = self.inner.cache.get(key, options.ttl) {
        (request.update)(&data, container);
        self.finish(container, ticket);
        return LoadOutcome::Cached;
      }
    }

    if self.inner.tracker.show_indicator(container) {
      self.inner.surface.insert_indicator(container);
    }

    let outcome = match self.inner.fetcher.get_json(&request.endpoint).await {
      Ok(data) => {
        self.inner.retries.reset(&request.endpoint);

        // A superseded response must not overwrite what a newer load cached
        if self.inner.tracker.is_current(container, ticket) {
          if let Some(key) = &options.cache_key {
            self.inner.cache.set(key, &data);
          }
          (request.update)(&data, container);
          self.failed().remove(container);
          LoadOutcome::Fetched
        } else {
          debug!(
            "Discarding response from {}: {} was reloaded",
            request.endpoint, container
          );
          LoadOutcome::Superseded
        }
      }
      Err(e) => self.handle_failure(&request, ticket, e.to_string()),
    };

    self.finish(container, ticket);
    outcome
  }

  fn handle_failure(
    &self,
    request: &LoadRequest,
    ticket: LoadTicket,
    message: String,
  ) -> LoadOutcome {
    error!("Error loading data from {}: {}", request.endpoint, message);

    if !self.inner.tracker.is_current(&request.container_id, ticket) {
      return LoadOutcome::Superseded;
    }

    if request.options.retry_on_error {
      let max_retries = self.inner.retries.policy().max_retries;
      match self.inner.retries.record_failure(&request.endpoint) {
        RetryDecision::Retry { attempt, delay } => {
          info!(
            "Retrying {} (attempt {}/{}) in {}ms",
            request.endpoint,
            attempt,
            max_retries,
            delay.as_millis()
          );
          let next = self.schedule_retry(request.clone(), ticket, delay);
          return LoadOutcome::Retrying {
            attempt,
            delay,
            next,
          };
        }
        RetryDecision::GiveUp { attempts } => {
          debug!("Giving up on {} after {} retries", request.endpoint, attempts);
        }
      }
    }

    self.show_error(request, &message);
    LoadOutcome::Failed { message }
  }

  fn schedule_retry(
    &self,
    request: LoadRequest,
    ticket: LoadTicket,
    delay: Duration,
  ) -> JoinHandle<LoadOutcome> {
    let this = self.clone();
    tokio::spawn(async move {
      tokio::time::sleep(delay).await;

      if !this.inner.tracker.is_current(&request.container_id, ticket) {
        debug!(
          "Dropping retry of {}: {} was reloaded",
          request.endpoint, request.container_id
        );
        return LoadOutcome::Superseded;
      }

      this.load_data(request).await
    })
  }

  fn show_skeleton(&self, container: &str, kind: SkeletonKind) {
    // Replacing the content removes any indicator along with it
    self.inner.tracker.hide_indicator(container);
    self.inner.surface.replace(container, Block::Skeleton(kind));
    self.inner.tracker.set_loading(container, true);
  }

  fn show_error(&self, request: &LoadRequest, message: &str) {
    let container = request.container_id.as_str();
    self.inner.tracker.hide_indicator(container);
    self.inner.surface.replace(
      container,
      Block::Error(ErrorBlock {
        message: message.to_string(),
        retry: RetryAction {
          container_id: container.to_string(),
          endpoint: request.endpoint.clone(),
        },
      }),
    );
    self.failed().insert(container.to_string(), request.clone());
  }

  /// Clear the indicator and loading flag, unless a newer load owns them.
  fn finish(&self, container: &str, ticket: LoadTicket) {
    if !self.inner.tracker.is_current(container, ticket) {
      return;
    }
    // The surface may still show an indicator the tracker already forgot
    self.inner.tracker.hide_indicator(container);
    self.inner.surface.remove_indicator(container);
    self.inner.tracker.set_loading(container, false);
  }

  fn failed(&self) -> MutexGuard<'_, HashMap<String, LoadRequest>> {
    self.inner.failed.lock().unwrap_or_else(|e| e.into_inner())
  }
}

impl<S: CacheStorage> Clone for ProgressiveLoader<S> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheKey, MemoryStorage};
  use crate::clock::ManualClock;
  use crate::fetch::testing::ScriptedFetcher;
  use crate::render::MemorySurface;
  use serde_json::{json, Value};

  struct Harness {
    loader: ProgressiveLoader<MemoryStorage>,
    fetcher: Arc<ScriptedFetcher>,
    surface: Arc<MemorySurface>,
    clock: ManualClock,
    updates: Arc<Mutex<Vec<(Value, String)>>>,
  }

  impl Harness {
    fn new() -> Self {
      let fetcher = Arc::new(ScriptedFetcher::new());
      let surface = Arc::new(MemorySurface::new());
      let clock = ManualClock::at(1_000_000);
      let cache = TtlCache::new(MemoryStorage::new()).with_clock(Arc::new(clock.clone()));
      let loader = ProgressiveLoader::new(
        fetcher.clone(),
        surface.clone(),
        cache,
        RetryPolicy::default(),
      );

      Self {
        loader,
        fetcher,
        surface,
        clock,
        updates: Arc::new(Mutex::new(Vec::new())),
      }
    }

    fn request(&self, endpoint: &str, container: &str) -> LoadRequest {
      let updates = self.updates.clone();
      LoadRequest::new(endpoint, container, move |data, container| {
        updates
          .lock()
          .unwrap()
          .push((data.clone(), container.to_string()));
      })
    }

    fn updates(&self) -> Vec<(Value, String)> {
      self.updates.lock().unwrap().clone()
    }
  }

  fn cached_options(key: &str, ttl_ms: u64) -> LoadOptions {
    LoadOptions::default().cached(CacheKey::new(key).unwrap(), Duration::from_millis(ttl_ms))
  }

  #[tokio::test]
  async fn test_fetch_then_cache_hit() {
    let h = Harness::new();
    h.fetcher.ok("/api/x", json!({"v": 1}));

    let request = h.request("/api/x", "c1").with_options(cached_options("x", 5000));
    let outcome = h.loader.load_data(request.clone()).await;
    assert!(matches!(outcome, LoadOutcome::Fetched));
    assert_eq!(h.updates(), vec![(json!({"v": 1}), "c1".to_string())]);
    assert_eq!(h.fetcher.calls("/api/x"), 1);

    let stored = h.loader.cache().get(&CacheKey::new("x").unwrap(), Duration::from_millis(5000));
    assert_eq!(stored, Some(json!({"v": 1})));

    h.clock.advance(4_999);
    let outcome = h.loader.load_data(request).await;
    assert!(matches!(outcome, LoadOutcome::Cached));
    assert_eq!(h.updates().len(), 2);
    assert_eq!(h.updates()[1], (json!({"v": 1}), "c1".to_string()));
    assert_eq!(h.fetcher.calls("/api/x"), 1);
    assert!(!h.loader.is_loading("c1"));
  }

  #[tokio::test]
  async fn test_expired_cache_fetches_again() {
    let h = Harness::new();
    h.fetcher.ok("/api/x", json!(1));
    h.fetcher.ok("/api/x", json!(2));

    let request = h.request("/api/x", "c1").with_options(cached_options("x", 5000));
    h.loader.load_data(request.clone()).await;
    h.clock.advance(5_001);
    let outcome = h.loader.load_data(request).await;

    assert!(matches!(outcome, LoadOutcome::Fetched));
    assert_eq!(h.fetcher.calls("/api/x"), 2);
    assert_eq!(h.updates()[1].0, json!(2));
  }

  #[tokio::test]
  async fn test_skeleton_and_indicator_during_fetch() {
    let h = Harness::new();
    let reply = h.fetcher.deferred("/api/slow");

    let request = h
      .request("/api/slow", "c1")
      .with_options(LoadOptions::default().with_skeleton(SkeletonKind::Table));
    let task = tokio::spawn(h.loader.load_data(request));

    while h.fetcher.calls("/api/slow") == 0 {
      tokio::task::yield_now().await;
    }

    let view = h.surface.view("c1").unwrap();
    assert_eq!(view.block, Some(Block::Skeleton(SkeletonKind::Table)));
    assert!(view.indicator);
    assert!(h.loader.is_loading("c1"));

    reply.send(Ok(json!([]))).unwrap();
    assert!(matches!(task.await.unwrap(), LoadOutcome::Fetched));

    assert!(!h.surface.view("c1").unwrap().indicator);
    assert!(!h.loader.is_loading("c1"));
  }

  #[tokio::test]
  async fn test_without_skeleton_leaves_content() {
    let h = Harness::new();
    h.surface.replace("c1", Block::Content("old".into()));
    h.fetcher.ok("/api/x", json!(1));

    let request = h
      .request("/api/x", "c1")
      .with_options(LoadOptions::default().without_skeleton());
    h.loader.load_data(request).await;

    let view = h.surface.view("c1").unwrap();
    assert_eq!(view.block, Some(Block::Content("old".into())));
    assert_eq!(view.writes, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_backoff_delays_then_error_block() {
    let h = Harness::new();
    for _ in 0..4 {
      h.fetcher.fail("/api/down", "HTTP 500: Internal Server Error");
    }

    let mut delays = Vec::new();
    let mut outcome = h.loader.load_data(h.request("/api/down", "c1")).await;
    while let LoadOutcome::Retrying { delay, next, .. } = outcome {
      delays.push(delay.as_millis());
      outcome = next.await.unwrap();
    }

    assert_eq!(delays, vec![1000, 2000, 4000]);
    match outcome {
      LoadOutcome::Failed { message } => assert!(message.contains("HTTP 500")),
      other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(h.fetcher.calls("/api/down"), 4);
    assert!(h.updates().is_empty());

    let view = h.surface.view("c1").unwrap();
    match view.block {
      Some(Block::Error(error)) => {
        assert_eq!(error.retry.endpoint, "/api/down");
        assert_eq!(error.retry.container_id, "c1");
      }
      other => panic!("expected error block, got {:?}", other),
    }
    assert!(!view.indicator);
    assert!(!h.loader.is_loading("c1"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_retry_waits_for_backoff() {
    let h = Harness::new();
    h.fetcher.fail("/api/x", "boom");
    h.fetcher.ok("/api/x", json!("ok"));

    let start = tokio::time::Instant::now();
    let outcome = h.loader.load_data(h.request("/api/x", "c1")).await;
    assert!(matches!(
      outcome,
      LoadOutcome::Retrying { attempt: 1, .. }
    ));
    assert!(!h.loader.is_loading("c1"));

    let settled = outcome.settle().await;
    assert!(matches!(settled, LoadOutcome::Fetched));
    assert!(start.elapsed() >= Duration::from_millis(1000));
    assert_eq!(h.updates(), vec![(json!("ok"), "c1".to_string())]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_success_resets_backoff() {
    let h = Harness::new();
    h.fetcher.fail("/api/x", "boom");
    h.fetcher.ok("/api/x", json!(1));
    h.fetcher.fail("/api/x", "boom");

    let outcome = h.loader.load_data(h.request("/api/x", "c1")).await;
    assert!(matches!(outcome.settle().await, LoadOutcome::Fetched));
    assert_eq!(h.loader.retry_attempts("/api/x"), 0);

    match h.loader.load_data(h.request("/api/x", "c1")).await {
      LoadOutcome::Retrying { attempt, delay, .. } => {
        assert_eq!(attempt, 1);
        assert_eq!(delay, Duration::from_millis(1000));
      }
      other => panic!("expected retry, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_no_retry_fails_immediately() {
    let h = Harness::new();
    h.fetcher.fail("/api/x", "boom");

    let request = h
      .request("/api/x", "c1")
      .with_options(LoadOptions::default().without_retry());
    let outcome = h.loader.load_data(request).await;

    assert!(matches!(outcome, LoadOutcome::Failed { .. }));
    assert_eq!(h.loader.retry_attempts("/api/x"), 0);
    assert_eq!(h.fetcher.calls("/api/x"), 1);
  }

  #[tokio::test]
  async fn test_cache_hit_leaves_retry_state_alone() {
    let h = Harness::new();
    h.fetcher.fail("/api/x", "boom");
    let failing = h.request("/api/x", "c1");
    let pending = h.loader.load_data(failing).await;
    assert_eq!(h.loader.retry_attempts("/api/x"), 1);

    h.loader
      .cache()
      .set(&CacheKey::new("x").unwrap(), &json!("cached"));
    let request = h.request("/api/x", "c2").with_options(cached_options("x", 5000));
    assert!(matches!(h.loader.load_data(request).await, LoadOutcome::Cached));
    assert_eq!(h.loader.retry_attempts("/api/x"), 1);

    drop(pending);
  }

  #[tokio::test]
  async fn test_newer_load_wins_over_slow_response() {
    let h = Harness::new();
    let slow = h.fetcher.deferred("/api/slow");
    h.fetcher.ok("/api/fast", json!("fresh"));

    let first = tokio::spawn(h.loader.load_data(h.request("/api/slow", "c1")));
    while h.fetcher.calls("/api/slow") == 0 {
      tokio::task::yield_now().await;
    }

    let second = h.loader.load_data(h.request("/api/fast", "c1")).await;
    assert!(matches!(second, LoadOutcome::Fetched));

    slow.send(Ok(json!("stale"))).unwrap();
    assert!(matches!(first.await.unwrap(), LoadOutcome::Superseded));

    assert_eq!(h.updates(), vec![(json!("fresh"), "c1".to_string())]);
    assert!(!h.loader.is_loading("c1"));
  }

  #[tokio::test]
  async fn test_slow_response_does_not_overwrite_cache() {
    let h = Harness::new();
    let slow = h.fetcher.deferred("/api/x");
    h.fetcher.ok("/api/x", json!("fresh"));
    let options = cached_options("x", 60_000);

    let first = tokio::spawn(
      h.loader
        .load_data(h.request("/api/x", "c1").with_options(options.clone())),
    );
    while h.fetcher.calls("/api/x") == 0 {
      tokio::task::yield_now().await;
    }

    let second = h
      .loader
      .load_data(h.request("/api/x", "c1").with_options(options.clone()))
      .await;
    assert!(matches!(second, LoadOutcome::Fetched));

    slow.send(Ok(json!("stale"))).unwrap();
    assert!(matches!(first.await.unwrap(), LoadOutcome::Superseded));

    let third = h
      .loader
      .load_data(h.request("/api/x", "c1").with_options(options))
      .await;
    assert!(matches!(third, LoadOutcome::Cached));
    assert_eq!(h.fetcher.calls("/api/x"), 2);

    let values: Vec<Value> = h.updates().into_iter().map(|(v, _)| v).collect();
    assert_eq!(values, vec![json!("fresh"), json!("fresh")]);
  }

  #[tokio::test]
  async fn test_superseded_failure_renders_nothing() {
    let h = Harness::new();
    let slow = h.fetcher.deferred("/api/slow");
    h.fetcher.ok("/api/fast", json!("fresh"));

    let first = tokio::spawn(h.loader.load_data(h.request("/api/slow", "c1")));
    while h.fetcher.calls("/api/slow") == 0 {
      tokio::task::yield_now().await;
    }
    h.loader.load_data(h.request("/api/fast", "c1")).await;

    slow.send(Err("HTTP 502: Bad Gateway".into())).unwrap();
    assert!(matches!(first.await.unwrap(), LoadOutcome::Superseded));
    assert_eq!(h.loader.retry_attempts("/api/slow"), 0);
    assert!(!matches!(
      h.surface.view("c1").unwrap().block,
      Some(Block::Error(_))
    ));
  }

  #[tokio::test(start_paused = true)]
  async fn test_pending_retry_dropped_after_reload() {
    let h = Harness::new();
    h.fetcher.fail("/api/x", "boom");
    h.fetcher.ok("/api/y", json!("other"));

    let outcome = h.loader.load_data(h.request("/api/x", "c1")).await;
    assert!(matches!(outcome, LoadOutcome::Retrying { .. }));

    h.loader.load_data(h.request("/api/y", "c1")).await;

    assert!(matches!(outcome.settle().await, LoadOutcome::Superseded));
    assert_eq!(h.fetcher.calls("/api/x"), 1);
  }

  #[tokio::test]
  async fn test_manual_retry_after_failure() {
    let h = Harness::new();
    h.fetcher.fail("/api/x", "boom");
    h.fetcher.ok("/api/x", json!("recovered"));

    let request = h
      .request("/api/x", "c1")
      .with_options(LoadOptions::default().without_retry());
    assert!(matches!(
      h.loader.load_data(request).await,
      LoadOutcome::Failed { .. }
    ));

    let retry = h.loader.retry_failed("c1").unwrap();
    assert!(matches!(retry.await, LoadOutcome::Fetched));
    assert_eq!(h.updates(), vec![(json!("recovered"), "c1".to_string())]);
    assert!(h.loader.retry_failed("c1").is_none());
  }

  #[tokio::test]
  async fn test_indicator_not_duplicated() {
    let h = Harness::new();
    let a = h.fetcher.deferred("/api/a");
    let b = h.fetcher.deferred("/api/b");

    let options = LoadOptions::default().without_skeleton();
    let first = tokio::spawn(
      h.loader
        .load_data(h.request("/api/a", "c1").with_options(options.clone())),
    );
    let second = tokio::spawn(
      h.loader
        .load_data(h.request("/api/b", "c1").with_options(options)),
    );
    while h.fetcher.calls("/api/a") == 0 || h.fetcher.calls("/api/b") == 0 {
      tokio::task::yield_now().await;
    }
    assert!(h.surface.view("c1").unwrap().indicator);

    a.send(Ok(json!(1))).unwrap();
    b.send(Ok(json!(2))).unwrap();
    first.await.unwrap();
    second.await.unwrap();
    assert!(!h.surface.view("c1").unwrap().indicator);
  }

  #[tokio::test]
  async fn test_reset_clears_bookkeeping() {
    let h = Harness::new();
    h.fetcher.fail("/api/x", "boom");
    let pending = h.loader.load_data(h.request("/api/x", "c1")).await;
    assert_eq!(h.loader.retry_attempts("/api/x"), 1);

    h.loader.reset();
    assert_eq!(h.loader.retry_attempts("/api/x"), 0);
    assert!(!h.loader.is_loading("c1"));
    drop(pending);
  }

  #[tokio::test]
  async fn test_reset_during_load_still_removes_indicator() {
    let h = Harness::new();
    let reply = h.fetcher.deferred("/api/slow");

    let task = tokio::spawn(h.loader.load_data(h.request("/api/slow", "c1")));
    while h.fetcher.calls("/api/slow") == 0 {
      tokio::task::yield_now().await;
    }
    assert!(h.surface.view("c1").unwrap().indicator);

    h.loader.reset();
    reply.send(Ok(json!("done"))).unwrap();
    assert!(matches!(task.await.unwrap(), LoadOutcome::Fetched));

    assert!(!h.surface.view("c1").unwrap().indicator);
    assert!(!h.loader.is_loading("c1"));
  }

  #[tokio::test]
  async fn test_clear_cache_counts_entries() {
    let h = Harness::new();
    h.loader.cache().set(&CacheKey::new("a").unwrap(), &json!(1));
    h.loader.cache().set(&CacheKey::new("b").unwrap(), &json!(2));
    assert_eq!(h.loader.clear_cache(), 2);
    assert_eq!(h.loader.clear_cache(), 0);
  }

  #[tokio::test]
  async fn test_independent_loaders_share_nothing() {
    let a = Harness::new();
    let b = Harness::new();
    a.fetcher.fail("/api/x", "boom");
    let pending = a.loader.load_data(a.request("/api/x", "c1")).await;

    assert_eq!(a.loader.retry_attempts("/api/x"), 1);
    assert_eq!(b.loader.retry_attempts("/api/x"), 0);
    drop(pending);
  }
}
