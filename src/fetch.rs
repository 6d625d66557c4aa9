//! JSON fetching over HTTP.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Fetches a JSON document for an endpoint.
///
/// Any non-success status is an error regardless of the payload.
pub trait Fetcher: Send + Sync {
  fn get_json<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, Result<Value>>;
}

/// `reqwest`-backed fetcher.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  base_url: Option<Url>,
}

impl HttpFetcher {
  pub fn new(base_url: Option<&str>, timeout: Duration) -> Result<Self> {
    let base_url = base_url
      .map(|u| Url::parse(u).map_err(|e| eyre!("Invalid base URL '{}': {}", u, e)))
      .transpose()?;

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("progload/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, base_url })
  }

  /// Resolve an endpoint against the base URL. Absolute URLs pass through.
  pub fn resolve(&self, endpoint: &str) -> Result<Url> {
    match Url::parse(endpoint) {
      Ok(url) => Ok(url),
      Err(url::ParseError::RelativeUrlWithoutBase) => {
        let base = self
          .base_url
          .as_ref()
          .ok_or_else(|| eyre!("Relative endpoint '{}' needs a base URL", endpoint))?;
        base
          .join(endpoint)
          .map_err(|e| eyre!("Invalid endpoint '{}': {}", endpoint, e))
      }
      Err(e) => Err(eyre!("Invalid endpoint '{}': {}", endpoint, e)),
    }
  }

  async fn fetch(&self, endpoint: &str) -> Result<Value> {
    let url = self.resolve(endpoint)?;
    debug!("GET {}", url);

    let response = self
      .client
      .get(url)
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", endpoint, e))?;

    let status = response.status();
    if !status.is_success() {
      return Err(eyre!(
        "HTTP {}: {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown")
      ));
    }

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response from {}: {}", endpoint, e))?;

    serde_json::from_slice(&body).map_err(|e| eyre!("Invalid JSON from {}: {}", endpoint, e))
  }
}

impl Fetcher for HttpFetcher {
  fn get_json<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, Result<Value>> {
    Box::pin(self.fetch(endpoint))
  }
}
