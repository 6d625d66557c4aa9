//! Per-container loading state, indicators and load generations.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

/// Identifies one load of one container.
///
/// Each new load of a container bumps its generation; only the newest
/// generation may render into the container or clear its loading state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
  pub generation: u64,
}

#[derive(Debug, Default)]
struct TrackerState {
  loading: HashMap<String, bool>,
  indicators: HashSet<String>,
  generations: HashMap<String, u64>,
}

#[derive(Debug, Default)]
pub struct LoadingTracker {
  state: Mutex<TrackerState>,
}

impl LoadingTracker {
  pub fn new() -> Self {
    Self::default()
  }

  /// Start a new load of `container`, superseding any load in flight.
  pub fn begin(&self, container: &str) -> LoadTicket {
    let mut state = self.lock();
    let generation = state
      .generations
      .entry(container.to_string())
      .and_modify(|g| *g += 1)
      .or_insert(1);
    let ticket = LoadTicket {
      generation: *generation,
    };
    state.loading.insert(container.to_string(), true);
    ticket
  }

  /// Whether `ticket` is still the newest load of `container`.
  pub fn is_current(&self, container: &str, ticket: LoadTicket) -> bool {
    self.lock().generations.get(container).copied() == Some(ticket.generation)
  }

  pub fn set_loading(&self, container: &str, loading: bool) {
    self.lock().loading.insert(container.to_string(), loading);
  }

  pub fn is_loading(&self, container: &str) -> bool {
    self.lock().loading.get(container).copied().unwrap_or(false)
  }

  /// Register an indicator for `container`. Returns false if one is
  /// already shown.
  pub fn show_indicator(&self, container: &str) -> bool {
    self.lock().indicators.insert(container.to_string())
  }

  /// Unregister the indicator for `container`. Returns false if none was
  /// shown.
  pub fn hide_indicator(&self, container: &str) -> bool {
    self.lock().indicators.remove(container)
  }

  pub fn has_indicator(&self, container: &str) -> bool {
    self.lock().indicators.contains(container)
  }

  /// Forget loading flags and indicators.
  ///
  /// Generations survive so loads still in flight stay ordered.
  pub fn clear(&self) {
    let mut state = self.lock();
    state.loading.clear();
    state.indicators.clear();
  }

  fn lock(&self) -> MutexGuard<'_, TrackerState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_begin_marks_loading() {
    let tracker = LoadingTracker::new();
    assert!(!tracker.is_loading("c1"));

    tracker.begin("c1");
    assert!(tracker.is_loading("c1"));
    assert!(!tracker.is_loading("c2"));

    tracker.set_loading("c1", false);
    assert!(!tracker.is_loading("c1"));
  }

  #[test]
  fn test_newer_load_supersedes_older() {
    let tracker = LoadingTracker::new();
    let first = tracker.begin("c1");
    let second = tracker.begin("c1");
    let other = tracker.begin("c2");

    assert!(!tracker.is_current("c1", first));
    assert!(tracker.is_current("c1", second));
    assert!(tracker.is_current("c2", other));
  }

  #[test]
  fn test_indicator_is_idempotent() {
    let tracker = LoadingTracker::new();
    assert!(tracker.show_indicator("c1"));
    assert!(!tracker.show_indicator("c1"));
    assert!(tracker.has_indicator("c1"));

    assert!(tracker.hide_indicator("c1"));
    assert!(!tracker.hide_indicator("c1"));
  }

  #[test]
  fn test_clear_keeps_generations() {
    let tracker = LoadingTracker::new();
    let ticket = tracker.begin("c1");
    tracker.show_indicator("c1");

    tracker.clear();
    assert!(!tracker.is_loading("c1"));
    assert!(!tracker.has_indicator("c1"));
    assert!(tracker.is_current("c1", ticket));
  }
}
