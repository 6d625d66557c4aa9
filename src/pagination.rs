//! Page tracking and page-selection controls for paged containers.

use color_eyre::Result;
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Most page buttons shown at once.
const MAX_VISIBLE: u32 = 5;

/// Fetches and renders one page.
type PageFn = Arc<dyn Fn(u32) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Result of a `load_page` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageLoad {
  Loaded,
  Failed(String),
  /// Another page load was still in progress
  Skipped,
}

#[derive(Debug, Clone, Copy)]
struct PageState {
  current_page: u32,
  total_pages: u32,
}

/// Tracks the current page of one container and guards against
/// overlapping page loads.
pub struct Pagination {
  container_id: String,
  load_page_fn: PageFn,
  state: Mutex<PageState>,
  loading: AtomicBool,
}

impl Pagination {
  pub fn new<F, Fut>(container_id: impl Into<String>, load_page_fn: F) -> Self
  where
    F: Fn(u32) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
  {
    Self {
      container_id: container_id.into(),
      load_page_fn: Arc::new(move |page| -> BoxFuture<'static, Result<()>> {
        Box::pin(load_page_fn(page))
      }),
      state: Mutex::new(PageState {
        current_page: 1,
        total_pages: 1,
      }),
      loading: AtomicBool::new(false),
    }
  }

  pub fn container_id(&self) -> &str {
    &self.container_id
  }

  pub fn current_page(&self) -> u32 {
    self.lock().current_page
  }

  pub fn total_pages(&self) -> u32 {
    self.lock().total_pages
  }

  pub fn is_loading(&self) -> bool {
    self.loading.load(Ordering::SeqCst)
  }

  /// Load `page` through the page callback.
  ///
  /// This is a no-op while another page load is in progress.
  pub async fn load_page(&self, page: u32) -> PageLoad {
    if self
      .loading
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      debug!(
        "Ignoring load of page {} for {}: load in progress",
        page, self.container_id
      );
      return PageLoad::Skipped;
    }
    let _guard = LoadingGuard(&self.loading);

    self.lock().current_page = page.max(1);

    match (self.load_page_fn)(page.max(1)).await {
      Ok(()) => PageLoad::Loaded,
      Err(e) => {
        warn!(
          "Failed to load page {} for {}: {}",
          page, self.container_id, e
        );
        PageLoad::Failed(e.to_string())
      }
    }
  }

  /// Update page numbers from a response carrying a `pagination` object
  /// (`{"page": n, "total_pages": n}`), or those fields at the top level.
  ///
  /// Returns false if the value has no page information.
  pub fn sync_from(&self, value: &Value) -> bool {
    let info = value.get("pagination").unwrap_or(value);
    let page = info.get("page").and_then(Value::as_u64);
    let total = info.get("total_pages").and_then(Value::as_u64);

    if page.is_none() && total.is_none() {
      return false;
    }

    let mut state = self.lock();
    if let Some(total) = total {
      state.total_pages = clamp_page(total);
    }
    if let Some(page) = page {
      state.current_page = clamp_page(page);
    }
    true
  }

  /// Build page controls for `total_pages` pages around the current page.
  pub fn create_controls(&self, total_pages: u32) -> PaginationControls {
    let mut state = self.lock();
    state.total_pages = total_pages.max(1);
    let current = state.current_page;
    let total = state.total_pages;
    drop(state);

    let half = MAX_VISIBLE / 2;
    let mut start = current.saturating_sub(half).max(1);
    let end = start.saturating_add(MAX_VISIBLE - 1).min(total);
    if (end + 1).saturating_sub(start) < MAX_VISIBLE {
      start = (end + 1).saturating_sub(MAX_VISIBLE).max(1);
    }

    PaginationControls {
      previous: NavButton {
        target: current.saturating_sub(1).max(1),
        disabled: current <= 1,
      },
      pages: (start..=end)
        .map(|page| PageButton {
          page,
          active: page == current,
        })
        .collect(),
      next: NavButton {
        target: current.saturating_add(1).min(total),
        disabled: current >= total,
      },
    }
  }

  fn lock(&self) -> MutexGuard<'_, PageState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }
}

impl fmt::Debug for Pagination {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = *self.lock();
    f.debug_struct("Pagination")
      .field("container_id", &self.container_id)
      .field("current_page", &state.current_page)
      .field("total_pages", &state.total_pages)
      .field("is_loading", &self.is_loading())
      .finish_non_exhaustive()
  }
}

/// Clears the in-progress flag however the page load ends.
struct LoadingGuard<'a>(&'a AtomicBool);

impl Drop for LoadingGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::SeqCst);
  }
}

fn clamp_page(n: u64) -> u32 {
  n.clamp(1, u32::MAX as u64) as u32
}

/// Previous/next button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavButton {
  pub target: u32,
  pub disabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageButton {
  pub page: u32,
  pub active: bool,
}

/// Navigable description of the page controls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationControls {
  pub previous: NavButton,
  pub pages: Vec<PageButton>,
  pub next: NavButton,
}

impl PaginationControls {
  pub fn page_numbers(&self) -> Vec<u32> {
    self.pages.iter().map(|b| b.page).collect()
  }
}

impl fmt::Display for PaginationControls {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let nav = |symbol: &str, button: &NavButton| {
      if button.disabled {
        "·".to_string()
      } else {
        symbol.to_string()
      }
    };

    let pages: Vec<String> = self
      .pages
      .iter()
      .map(|b| {
        if b.active {
          format!("[{}]", b.page)
        } else {
          b.page.to_string()
        }
      })
      .collect();

    write!(
      f,
      "{} {} {}",
      nav("‹", &self.previous),
      pages.join(" "),
      nav("›", &self.next)
    )
  }
}
