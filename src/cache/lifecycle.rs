//! Install/activate lifecycle over the versioned cache namespaces.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use super::namespace::{ActiveSet, RequestKey};
use super::storage::CacheStorage;
use crate::error::AgentError;
use crate::fetch::Network;
use crate::http::{AgentRequest, AgentResponse, Destination};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  /// Nothing installed by this process yet
  Pending,
  /// Static namespace populated, previous version still authoritative
  Installed,
  /// This version's namespaces are authoritative
  Active,
}

/// Owns the {Static, Runtime} namespaces for one cache version.
///
/// Reads take a shared lock on the lifecycle state and activation takes it
/// exclusively, so no lookup can observe a half-purged namespace set.
pub struct CacheLifecycle<S: CacheStorage> {
  storage: Arc<S>,
  active: ActiveSet,
  state: Arc<RwLock<LifecycleState>>,
}

impl<S: CacheStorage> CacheLifecycle<S> {
  pub fn new(storage: S, prefix: &str, version: &str) -> Self {
    Self {
      storage: Arc::new(storage),
      active: ActiveSet::for_version(prefix, version),
      state: Arc::new(RwLock::new(LifecycleState::Pending)),
    }
  }

  #[cfg(test)]
  pub fn active_set(&self) -> &ActiveSet {
    &self.active
  }

  #[cfg(test)]
  pub fn storage(&self) -> &S {
    &self.storage
  }

  pub async fn state(&self) -> LifecycleState {
    *self.state.read().await
  }

  pub async fn is_active(&self) -> bool {
    self.state().await == LifecycleState::Active
  }

  /// Fetch every route and store it in the Static namespace.
  ///
  /// All-or-nothing: one failed fetch, non-success status or rejected write
  /// fails the whole install and nothing from this attempt is kept.
  pub async fn install(&self, network: &dyn Network, origin: &Url, routes: &[String]) -> Result<usize> {
    let requests = routes
      .iter()
      .map(|route| {
        origin
          .join(route)
          .map(|url| AgentRequest::get(url).with_destination(Destination::Document))
          .map_err(|e| eyre!("Invalid precache route '{}': {}", route, e))
      })
      .collect::<Result<Vec<_>>>()?;

    let responses = try_join_all(requests.iter().map(|request| async move {
      let response = network
        .fetch(request)
        .await
        .map_err(|e| eyre!("Failed to precache {}: {}", request.url, e))?;
      if !response.is_success() {
        return Err(eyre!(
          "Failed to precache {}: status {}",
          request.url,
          response.status
        ));
      }
      Ok::<_, color_eyre::Report>((RequestKey::from_request(request), response))
    }))
    .await?;

    self.storage.put_all(&self.active.static_ns, &responses)?;
    self.storage.open_namespace(&self.active.runtime_ns)?;

    let mut state = self.state.write().await;
    if *state == LifecycleState::Pending {
      *state = LifecycleState::Installed;
    }

    info!(
      namespace = %self.active.static_ns.name,
      routes = responses.len(),
      "precached static routes"
    );
    Ok(responses.len())
  }

  /// Purge every namespace outside the active set, then start serving from it.
  pub async fn activate(&self) -> Result<Vec<String>> {
    let mut state = self.state.write().await;

    let purged = self.storage.retain_namespaces(&self.active.names())?;
    self.storage.open_namespace(&self.active.static_ns)?;
    self.storage.open_namespace(&self.active.runtime_ns)?;
    *state = LifecycleState::Active;

    for name in &purged {
      info!(namespace = %name, "purged stale cache namespace");
    }
    info!(
      static_ns = %self.active.static_ns.name,
      runtime_ns = %self.active.runtime_ns.name,
      "cache namespaces active"
    );
    Ok(purged)
  }

  /// Look up a response, Static namespace first.
  pub async fn lookup(&self, key: &RequestKey) -> Result<Option<AgentResponse>, AgentError> {
    let _state = self.state.read().await;

    for name in self.active.names() {
      let entry = self
        .storage
        .get(name, key)
        .map_err(|e| AgentError::CacheReadFailure(e.to_string()))?;
      if let Some(entry) = entry {
        debug!(
          namespace = %name,
          url = %entry.key.url,
          cached_at = %entry.cached_at,
          "cache hit"
        );
        return Ok(Some(entry.response));
      }
    }

    Ok(None)
  }

  /// Store a copy of a fetched response in the Runtime namespace.
  pub async fn store_runtime(
    &self,
    key: &RequestKey,
    response: &AgentResponse,
  ) -> Result<(), AgentError> {
    let _state = self.state.read().await;

    self
      .storage
      .put(&self.active.runtime_ns, key, response)
      .map_err(|e| AgentError::CacheWriteFailure(e.to_string()))
  }
}

impl<S: CacheStorage> Clone for CacheLifecycle<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      active: self.active.clone(),
      state: Arc::clone(&self.state),
    }
  }
}
