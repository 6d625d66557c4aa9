use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::{Block, Surface};

/// Observable state of one container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerView {
  pub block: Option<Block>,
  pub indicator: bool,
  /// Number of times the content was replaced
  pub writes: usize,
}

/// Surface that keeps container contents in memory.
///
/// The CLI prints it once loads settle; tests inspect it directly.
#[derive(Debug, Default)]
pub struct MemorySurface {
  containers: Mutex<BTreeMap<String, ContainerView>>,
}

impl MemorySurface {
  pub fn new() -> Self {
    Self::default()
  }

  /// Current view of `container`, if anything was ever written to it.
  pub fn view(&self, container: &str) -> Option<ContainerView> {
    self.lock().get(container).cloned()
  }

  /// Text of every container, in name order.
  pub fn render_all(&self) -> String {
    self
      .lock()
      .iter()
      .map(|(name, view)| {
        let mut out = format!("── {} ──\n", name);
        if view.indicator {
          out.push_str("⟳ Loading...\n");
        }
        if let Some(block) = &view.block {
          out.push_str(&block.render());
          out.push('\n');
        }
        out
      })
      .collect::<Vec<_>>()
      .join("\n")
  }

  fn lock(&self) -> MutexGuard<'_, BTreeMap<String, ContainerView>> {
    self.containers.lock().unwrap_or_else(|e| e.into_inner())
  }
}

impl Surface for MemorySurface {
  fn replace(&self, container: &str, block: Block) {
    let mut containers = self.lock();
    let view = containers.entry(container.to_string()).or_default();
    // Replacing content wipes children, indicator included
    view.indicator = false;
    view.block = Some(block);
    view.writes += 1;
  }

  fn insert_indicator(&self, container: &str) {
    self
      .lock()
      .entry(container.to_string())
      .or_default()
      .indicator = true;
  }

  fn remove_indicator(&self, container: &str) {
    if let Some(view) = self.lock().get_mut(container) {
      view.indicator = false;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::render::SkeletonKind;

  #[test]
  fn test_replace_counts_writes() {
    let surface = MemorySurface::new();
    surface.replace("c1", Block::Skeleton(SkeletonKind::Generic));
    surface.replace("c1", Block::Content("done".into()));

    let view = surface.view("c1").unwrap();
    assert_eq!(view.block, Some(Block::Content("done".into())));
    assert_eq!(view.writes, 2);
  }

  #[test]
  fn test_indicator_toggles() {
    let surface = MemorySurface::new();
    surface.insert_indicator("c1");
    assert!(surface.view("c1").unwrap().indicator);

    surface.remove_indicator("c1");
    assert!(!surface.view("c1").unwrap().indicator);

    // Removing from an unknown container does nothing
    surface.remove_indicator("c2");
    assert!(surface.view("c2").is_none());
  }

  #[test]
  fn test_render_all_lists_containers_in_order() {
    let surface = MemorySurface::new();
    surface.replace("b", Block::Content("second".into()));
    surface.replace("a", Block::Content("first".into()));
    surface.insert_indicator("b");

    let text = surface.render_all();
    let a = text.find("── a ──").unwrap();
    let b = text.find("── b ──").unwrap();
    assert!(a < b);
    assert!(text.contains("⟳ Loading..."));
  }
}
