//! Retry policy and per-endpoint attempt tracking.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// How many times a failed load is retried, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
  /// Retries allowed per endpoint before the error is surfaced
  pub max_retries: u32,
  /// Delay before the first retry; doubled for each further attempt
  #[serde(rename = "base_delay_ms", with = "millis")]
  pub base_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: 3,
      base_delay: Duration::from_millis(1000),
    }
  }
}

impl RetryPolicy {
  /// Delay before retrying when `attempt` retries have already been made.
  ///
  /// `2^attempt * base_delay`: 1s, 2s, 4s, ... with the default base.
  pub fn delay_for(&self, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    self.base_delay.saturating_mul(factor)
  }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
  /// Retry after `delay`; `attempt` is the 1-based retry number
  Retry { attempt: u32, delay: Duration },
  /// Retries exhausted
  GiveUp { attempts: u32 },
}

/// Endpoint-keyed attempt counters.
///
/// Counters are independent of containers and of the cache: only a
/// successful fetch resets them.
#[derive(Debug, Default)]
pub struct RetryTracker {
  policy: RetryPolicy,
  attempts: Mutex<HashMap<String, u32>>,
}

impl RetryTracker {
  pub fn new(policy: RetryPolicy) -> Self {
    Self {
      policy,
      attempts: Mutex::new(HashMap::new()),
    }
  }

  pub fn policy(&self) -> &RetryPolicy {
    &self.policy
  }

  /// Record a failure for `endpoint` and decide whether to retry.
  pub fn record_failure(&self, endpoint: &str) -> RetryDecision {
    let mut attempts = self.lock();
    let made = attempts.get(endpoint).copied().unwrap_or(0);

    if made < self.policy.max_retries {
      attempts.insert(endpoint.to_string(), made + 1);
      RetryDecision::Retry {
        attempt: made + 1,
        delay: self.policy.delay_for(made),
      }
    } else {
      RetryDecision::GiveUp { attempts: made }
    }
  }

  /// Forget the attempts made for `endpoint`.
  pub fn reset(&self, endpoint: &str) {
    self.lock().remove(endpoint);
  }

  /// Retries made so far for `endpoint`.
  pub fn attempts(&self, endpoint: &str) -> u32 {
    self.lock().get(endpoint).copied().unwrap_or(0)
  }

  /// Forget all endpoints.
  pub fn clear(&self) {
    self.lock().clear();
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, u32>> {
    // Counters stay usable even if a holder panicked
    self.attempts.lock().unwrap_or_else(|e| e.into_inner())
  }
}

/// Serde helpers for durations written as integer milliseconds.
pub(crate) mod millis {
  use serde::{Deserialize, Deserializer};
  use std::time::Duration;

  pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
  where
    D: Deserializer<'de>,
  {
    u64::deserialize(deserializer).map(Duration::from_millis)
  }
}
