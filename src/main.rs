use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use progload::cache::{CacheKey, CacheStorage, NoopStorage, SqliteStorage, TtlCache};
use progload::config::Config;
use progload::fetch::HttpFetcher;
use progload::loader::{BatchSummary, LoadOptions, LoadOutcome, LoadRequest, ProgressiveLoader};
use progload::pagination::{PageLoad, Pagination};
use progload::render::{Block, MemorySurface, SkeletonKind, Surface};

#[derive(Parser, Debug)]
#[command(name = "progload")]
#[command(about = "Progressively load JSON endpoints with caching and retries")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/progload/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Base URL for relative endpoints
  #[arg(long)]
  base_url: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Load one endpoint into a container
  Load {
    endpoint: String,

    #[arg(long, default_value = "main")]
    container: String,

    /// Cache the response under this key
    #[arg(long, conflicts_with = "cache")]
    cache_key: Option<String>,

    /// Cache the response under a key derived from the endpoint
    #[arg(long)]
    cache: bool,

    /// Cache time-to-live in milliseconds
    #[arg(long)]
    ttl_ms: Option<u64>,

    /// Skeleton shown while loading: generic, table, cards or dashboard
    #[arg(long, default_value = "generic")]
    skeleton: String,

    #[arg(long)]
    no_skeleton: bool,

    #[arg(long)]
    no_retry: bool,
  },

  /// Load every request listed in a YAML file concurrently
  Batch { file: PathBuf },

  /// Load one page of a paged endpoint and print page controls
  Page {
    /// Endpoint with a `{page}` placeholder, e.g. /api/members?page={page}
    template: String,

    #[arg(long, default_value_t = 1)]
    page: u32,

    /// Total pages (default: read from the response)
    #[arg(long)]
    total: Option<u32>,

    #[arg(long, default_value = "main")]
    container: String,
  },

  /// Remove all cached responses
  ClearCache,
}

/// Request list accepted by `progload batch`.
#[derive(Debug, Deserialize)]
struct BatchFile {
  requests: Vec<BatchEntry>,
}

#[derive(Debug, Deserialize)]
struct BatchEntry {
  endpoint: String,
  container: String,
  #[serde(flatten)]
  options: LoadOptions,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _log_guard = progload::logging::init()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override base URL if specified on command line
  let config = if let Some(base_url) = args.base_url {
    Config {
      base_url: Some(base_url),
      ..config
    }
  } else {
    config
  };

  if config.cache.enabled {
    let storage = SqliteStorage::open(config.cache.path.as_deref())?;
    execute(args.command, &config, TtlCache::new(storage)).await
  } else {
    execute(args.command, &config, TtlCache::new(NoopStorage)).await
  }
}

async fn execute<S: CacheStorage + 'static>(
  command: Command,
  config: &Config,
  cache: TtlCache<S>,
) -> Result<()> {
  let cache = cache.with_max_entries(config.cache.max_entries);
  let fetcher = Arc::new(HttpFetcher::new(
    config.base_url.as_deref(),
    config.request_timeout,
  )?);
  let surface = Arc::new(MemorySurface::new());
  let loader = ProgressiveLoader::new(fetcher, surface.clone(), cache, config.retry);

  match command {
    Command::Load {
      endpoint,
      container,
      cache_key,
      cache,
      ttl_ms,
      skeleton,
      no_skeleton,
      no_retry,
    } => {
      let ttl = ttl_ms
        .map(Duration::from_millis)
        .unwrap_or(config.cache.default_ttl);

      let mut options = LoadOptions::default().with_skeleton(SkeletonKind::parse(&skeleton));
      if let Some(key) = cache_key {
        options = options.cached(CacheKey::new(key)?, ttl);
      } else if cache {
        options = options.cached(CacheKey::derived(&endpoint), ttl);
      }
      if no_skeleton {
        options = options.without_skeleton();
      }
      if no_retry {
        options = options.without_retry();
      }

      let request = render_into(&surface, endpoint, container).with_options(options);
      let outcome = loader.load_data(request).await.settle().await;

      println!("{}", surface.render_all());
      eprintln!("{}", outcome.label());
      ensure_loaded(&[outcome])
    }

    Command::Batch { file } => {
      let contents = std::fs::read_to_string(&file)
        .map_err(|e| eyre!("Failed to read batch file {}: {}", file.display(), e))?;
      let batch: BatchFile = serde_yaml::from_str(&contents)
        .map_err(|e| eyre!("Failed to parse batch file {}: {}", file.display(), e))?;

      let requests = batch
        .requests
        .into_iter()
        .map(|entry| {
          render_into(&surface, entry.endpoint, entry.container).with_options(entry.options)
        })
        .collect();

      let outcomes = loader.load_multiple(requests).await;
      let mut settled = Vec::with_capacity(outcomes.len());
      for outcome in outcomes {
        settled.push(outcome.settle().await);
      }

      println!("{}", surface.render_all());
      let summary = BatchSummary::of(&settled);
      eprintln!(
        "{} requests: {} fetched, {} cached, {} failed",
        summary.total, summary.fetched, summary.cached, summary.failed
      );
      ensure_loaded(&settled)
    }

    Command::Page {
      template,
      page,
      total,
      container,
    } => {
      let last_page: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));

      let pagination = Pagination::new(container.clone(), {
        let loader = loader.clone();
        let surface = surface.clone();
        let last_page = last_page.clone();
        move |page| {
          let endpoint = template.replace("{page}", &page.to_string());
          let last_page = last_page.clone();
          let request = render_into(&surface, endpoint, container.clone()).with_options(
            LoadOptions::default().with_skeleton(SkeletonKind::Table),
          );
          let request = LoadRequest {
            update: Arc::new({
              let render = request.update.clone();
              move |data: &Value, container: &str| {
                render(data, container);
                *last_page.lock().unwrap_or_else(|e| e.into_inner()) = Some(data.clone());
              }
            }),
            ..request
          };
          let loading = loader.load_data(request);
          async move {
            let result: Result<()> = match loading.await.settle().await {
              LoadOutcome::Failed { message } => Err(eyre!(message)),
              _ => Ok(()),
            };
            result
          }
        }
      });

      let result = pagination.load_page(page).await;
      if let Some(data) = last_page.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
        pagination.sync_from(data);
      }
      let controls = pagination.create_controls(total.unwrap_or_else(|| pagination.total_pages()));

      println!("{}", surface.render_all());
      println!("{}", controls);
      match result {
        PageLoad::Failed(message) => Err(eyre!(message)),
        _ => Ok(()),
      }
    }

    Command::ClearCache => {
      let removed = loader.clear_cache();
      println!("Cleared {} cached items", removed);
      Ok(())
    }
  }
}

/// Request whose update callback renders the data as pretty JSON.
fn render_into(surface: &Arc<MemorySurface>, endpoint: String, container: String) -> LoadRequest {
  let surface = surface.clone();
  LoadRequest::new(endpoint, container, move |data, container| {
    let text = serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());
    surface.replace(container, Block::Content(text));
  })
}

fn ensure_loaded(outcomes: &[LoadOutcome]) -> Result<()> {
  let failures: Vec<&str> = outcomes
    .iter()
    .filter_map(|o| match o {
      LoadOutcome::Failed { message } => Some(message.as_str()),
      _ => None,
    })
    .collect();

  if failures.is_empty() {
    Ok(())
  } else {
    Err(eyre!("{} load(s) failed: {}", failures.len(), failures.join("; ")))
  }
}
