//! The agent: one handler per event kind over the cache, fetch policy,
//! notification and sync components.

use color_eyre::Result;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};
use url::Url;

use crate::budget::RetryBudget;
use crate::cache::{CacheLifecycle, CacheStorage};
use crate::config::Config;
use crate::fetch::{FetchPolicy, Interception, Network};
use crate::http::AgentRequest;
use crate::notification::{
  ActionEvent, ActionRouter, NotificationDisplay, PresentationSurface, RenderedNotification,
  RouteOutcome, Renderer,
};
use crate::sync::{DeferredSync, PendingWriteStore, SyncOutcome};

/// Everything the hosting platform can ask the agent to do.
#[derive(Debug, Clone)]
pub enum AgentEvent {
  /// Pre-populate the Static namespace
  Install,
  /// Purge stale namespaces and start intercepting
  Activate,
  Fetch(AgentRequest),
  /// Push message data, JSON text or object
  Push(Option<Value>),
  NotificationClick(ActionEvent),
  Sync(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
  Installed { routes: usize },
  Activated { purged: Vec<String> },
  /// Install or activate failed; the previous version stays authoritative
  LifecycleFailed { stage: &'static str, reason: String },
  Fetched(Interception),
  Displayed(RenderedNotification),
  Routed(RouteOutcome),
  Synced(SyncOutcome),
}

/// Platform capabilities the agent is wired to.
pub struct HostCapabilities {
  pub network: Arc<dyn Network>,
  pub display: Arc<dyn NotificationDisplay>,
  pub surfaces: Arc<dyn PresentationSurface>,
  pub store: Arc<dyn PendingWriteStore>,
}

pub struct Agent<S: CacheStorage + 'static> {
  origin: Url,
  precache: Vec<String>,
  network: Arc<dyn Network>,
  cache: CacheLifecycle<S>,
  policy: FetchPolicy<S>,
  renderer: Renderer,
  display: Arc<dyn NotificationDisplay>,
  router: ActionRouter,
  sync: DeferredSync,
}

impl<S: CacheStorage + 'static> Agent<S> {
  pub fn new(config: &Config, storage: S, host: HostCapabilities) -> Result<Self> {
    let budget = RetryBudget::new(
      config.budget.max_retries,
      std::time::Duration::from_secs(config.budget.window_secs),
    );
    Self::with_budget(config, storage, host, Arc::new(budget))
  }

  pub fn with_budget(
    config: &Config,
    storage: S,
    host: HostCapabilities,
    budget: Arc<RetryBudget>,
  ) -> Result<Self> {
    let origin = config.origin_url()?;
    let cache = CacheLifecycle::new(storage, &config.cache.prefix, &config.cache.version);
    let policy = FetchPolicy::new(
      origin.clone(),
      cache.clone(),
      budget,
      Arc::clone(&host.network),
      &config.fetch,
      &config.cache.landing_page,
    )?;
    let renderer = Renderer::new(config.notifications.clone());
    let router = ActionRouter::new(
      renderer.clone(),
      Arc::clone(&host.display),
      host.surfaces,
      &config.notifications.home_marker,
      config.notifications.snooze_delay(),
    );

    Ok(Self {
      origin,
      precache: config.cache.precache.clone(),
      network: host.network,
      cache,
      policy,
      renderer,
      display: host.display,
      router,
      sync: DeferredSync::new(&config.sync.tag, host.store),
    })
  }

  pub fn origin(&self) -> &Url {
    &self.origin
  }

  pub fn renderer(&self) -> &Renderer {
    &self.renderer
  }

  /// Run one event to completion.
  pub async fn dispatch(&self, event: AgentEvent) -> EventOutcome {
    match event {
      AgentEvent::Install => self.on_install().await,
      AgentEvent::Activate => self.on_activate().await,
      AgentEvent::Fetch(request) => EventOutcome::Fetched(self.policy.handle(&request).await),
      AgentEvent::Push(data) => self.on_push(data.as_ref()).await,
      AgentEvent::NotificationClick(event) => EventOutcome::Routed(self.router.route(&event).await),
      AgentEvent::Sync(tag) => EventOutcome::Synced(self.sync.handle(&tag).await),
    }
  }

  async fn on_install(&self) -> EventOutcome {
    match self
      .cache
      .install(self.network.as_ref(), &self.origin, &self.precache)
      .await
    {
      Ok(routes) => EventOutcome::Installed { routes },
      Err(e) => {
        error!(error = %e, "install failed");
        EventOutcome::LifecycleFailed {
          stage: "install",
          reason: e.to_string(),
        }
      }
    }
  }

  async fn on_activate(&self) -> EventOutcome {
    match self.cache.activate().await {
      Ok(purged) => {
        info!(purged = purged.len(), "agent active");
        EventOutcome::Activated { purged }
      }
      Err(e) => {
        error!(error = %e, "activate failed");
        EventOutcome::LifecycleFailed {
          stage: "activate",
          reason: e.to_string(),
        }
      }
    }
  }

  async fn on_push(&self, data: Option<&Value>) -> EventOutcome {
    let notification = self.renderer.render_push(data);
    if let Err(e) = self.display.show(&notification).await {
      warn!(error = %e, tag = %notification.tag, "failed to display notification");
    }
    EventOutcome::Displayed(notification)
  }
}
