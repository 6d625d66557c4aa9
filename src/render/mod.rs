//! Render targets for loaded data.
//!
//! A [`Surface`] is a set of named containers. The loader only ever writes
//! skeletons, error blocks and loading indicators; data rendering is left to
//! the update callback supplied with each request.

mod memory;
mod skeleton;

pub use memory::{ContainerView, MemorySurface};
pub use skeleton::SkeletonKind;

use std::fmt;

/// Something that can display container contents.
pub trait Surface: Send + Sync {
  /// Replace the whole content of `container`.
  fn replace(&self, container: &str, block: Block);

  /// Show a loading indicator as the first child of `container`.
  fn insert_indicator(&self, container: &str);

  /// Remove the loading indicator from `container`, if any.
  fn remove_indicator(&self, container: &str);
}

/// Content of a container.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
  Skeleton(SkeletonKind),
  Error(ErrorBlock),
  Content(String),
}

impl Block {
  pub fn render(&self) -> String {
    match self {
      Block::Skeleton(kind) => kind.render(),
      Block::Error(error) => error.to_string(),
      Block::Content(text) => text.clone(),
    }
  }
}

/// Inline error shown when a load gives up.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorBlock {
  pub message: String,
  /// The manual retry offered to the user
  pub retry: RetryAction,
}

/// Re-issues a failed load of `endpoint` into `container_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAction {
  pub container_id: String,
  pub endpoint: String,
}

impl fmt::Display for ErrorBlock {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "⚠ Error loading data: {}\n  [Retry] progload load {} --container {}",
      self.message, self.retry.endpoint, self.retry.container_id
    )
  }
}
