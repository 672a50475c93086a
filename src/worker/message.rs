//! Page → worker control messages.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use tracing::info;
use url::Url;

use super::{EventOutcome, Host, Worker, WorkerStorage};
use crate::net::Network;

/// Message envelope, e.g. `{"type":"CACHE_URLS","payload":["/a","/b"]}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  /// Activate the waiting worker now
  SkipWaiting,
  /// Add these URLs to the current cache
  CacheUrls(Vec<String>),
}

impl ControlMessage {
  pub fn from_json(json: &str) -> Result<Self> {
    serde_json::from_str(json).map_err(|e| eyre!("Invalid control message: {}", e))
  }
}

impl<S, N, H> Worker<S, N, H>
where
  S: WorkerStorage,
  N: Network + 'static,
  H: Host + 'static,
{
  pub async fn message(&self, message: ControlMessage) -> Result<EventOutcome> {
    match message {
      ControlMessage::SkipWaiting => Ok(match self.skip_waiting().await? {
        Some(state) => EventOutcome::Lifecycle(state),
        None => EventOutcome::Done,
      }),
      ControlMessage::CacheUrls(urls) => {
        self.cache_urls(&urls).await?;
        Ok(EventOutcome::Done)
      }
    }
  }

  /// Extend the current cache at runtime. Relative URLs resolve against the origin.
  pub async fn cache_urls(&self, urls: &[String]) -> Result<usize> {
    let resolved = urls
      .iter()
      .map(|u| {
        self
          .config
          .origin
          .join(u)
          .map_err(|e| eyre!("Invalid URL '{}': {}", u, e))
      })
      .collect::<Result<Vec<Url>>>()?;

    let count = self
      .precache(&resolved)
      .await
      .map_err(|e| eyre!("Failed to cache requested URLs: {}", e))?;
    info!(count, cache = %self.config.cache_name, "Cached URLs on request");
    Ok(count)
  }
}
