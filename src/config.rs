use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::DEFAULT_MAX_ENTRIES;
use crate::loader::{millis, RetryPolicy, DEFAULT_TTL};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Base URL that relative endpoints are resolved against
  pub base_url: Option<String>,
  #[serde(rename = "request_timeout_ms", with = "millis")]
  pub request_timeout: Duration,
  pub retry: RetryPolicy,
  pub cache: CacheConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      base_url: None,
      request_timeout: Duration::from_secs(30),
      retry: RetryPolicy::default(),
      cache: CacheConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub enabled: bool,
  /// Cache database location (default: $XDG_DATA_HOME/progload/cache.db)
  pub path: Option<PathBuf>,
  pub max_entries: usize,
  #[serde(rename = "default_ttl_ms", with = "millis")]
  pub default_ttl: Duration,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      path: None,
      max_entries: DEFAULT_MAX_ENTRIES,
      default_ttl: DEFAULT_TTL,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./progload.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/progload/config.yaml
  ///
  /// Without a config file every setting takes its default.
  /// `PROGLOAD_BASE_URL` overrides `base_url`.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    Ok(config.with_env_overrides())
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("progload.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("progload").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    // An empty file is a valid, all-defaults config
    if contents.trim().is_empty() {
      return Ok(Config::default());
    }
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  fn with_env_overrides(self) -> Self {
    match std::env::var("PROGLOAD_BASE_URL") {
      Ok(url) if !url.trim().is_empty() => Config {
        base_url: Some(url),
        ..self
      },
      _ => self,
    }
  }
}
