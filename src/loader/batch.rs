use futures::future::join_all;
use tracing::info;

use super::{LoadOutcome, LoadRequest, ProgressiveLoader};
use crate::cache::CacheStorage;

/// Outcome counts for a batch of loads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
  pub total: usize,
  pub cached: usize,
  pub fetched: usize,
  pub retrying: usize,
  pub failed: usize,
  pub superseded: usize,
}

impl BatchSummary {
  pub fn of(outcomes: &[LoadOutcome]) -> Self {
    outcomes.iter().fold(
      Self {
        total: outcomes.len(),
        ..Self::default()
      },
      |mut summary, outcome| {
        match outcome {
          LoadOutcome::Cached => summary.cached += 1,
          LoadOutcome::Fetched => summary.fetched += 1,
          LoadOutcome::Retrying { .. } => summary.retrying += 1,
          LoadOutcome::Failed { .. } => summary.failed += 1,
          LoadOutcome::Superseded => summary.superseded += 1,
        }
        summary
      },
    )
  }
}

impl<S: CacheStorage + 'static> ProgressiveLoader<S> {
  /// Run every load concurrently and wait for all of them.
  ///
  /// Each load handles its own failure; one failing request never holds up
  /// or cancels the others. Outcomes come back in request order.
  pub async fn load_multiple(&self, requests: Vec<LoadRequest>) -> Vec<LoadOutcome> {
    let count = requests.len();
    let outcomes = join_all(requests.into_iter().map(|r| self.load_data(r))).await;
    info!("Completed batch loading of {} requests", count);
    outcomes
  }
}
