//! Deferred sync: a named tag that flushes the external pending write store.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The store that owns queued offline writes. Retry and conflict handling
/// live there, not here.
pub trait PendingWriteStore: Send + Sync {
  fn flush(&self) -> BoxFuture<'_, Result<()>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
  Flushed,
  /// The flush failed; logged and dropped
  Failed,
  /// Not our tag
  Ignored,
}

pub struct DeferredSync {
  tag: String,
  store: Arc<dyn PendingWriteStore>,
}

impl DeferredSync {
  pub fn new(tag: &str, store: Arc<dyn PendingWriteStore>) -> Self {
    Self {
      tag: tag.to_string(),
      store,
    }
  }

  pub async fn handle(&self, tag: &str) -> SyncOutcome {
    if tag != self.tag {
      debug!(tag = %tag, "ignoring unknown sync tag");
      return SyncOutcome::Ignored;
    }

    match self.store.flush().await {
      Ok(()) => {
        info!(tag = %tag, "pending writes flushed");
        SyncOutcome::Flushed
      }
      Err(e) => {
        warn!(error = %e, tag = %tag, "pending write flush failed");
        SyncOutcome::Failed
      }
    }
  }
}

/// Asks the application backend to flush its pending writes over HTTP.
pub struct HttpFlushStore {
  client: reqwest::Client,
  url: String,
}

impl HttpFlushStore {
  pub fn new(url: &str) -> Self {
    Self {
      client: reqwest::Client::new(),
      url: url.to_string(),
    }
  }
}

impl PendingWriteStore for HttpFlushStore {
  fn flush(&self) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
      let response = self
        .client
        .post(&self.url)
        .send()
        .await
        .map_err(|e| eyre!("Failed to reach flush endpoint {}: {}", self.url, e))?;

      if !response.status().is_success() {
        return Err(eyre!(
          "Flush endpoint {} returned {}",
          self.url,
          response.status()
        ));
      }
      Ok(())
    })
  }
}

/// Used when no flush endpoint is configured.
pub struct NoopStore;

impl PendingWriteStore for NoopStore {
  fn flush(&self) -> BoxFuture<'_, Result<()>> {
    debug!("no pending write store configured");
    Box::pin(async { Ok(()) })
  }
}
