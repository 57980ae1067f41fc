//! Per-request decision pipeline.
//!
//! Rules apply in order and the first match wins:
//! 1. non-GET or cross-origin requests pass through
//! 2. dev-server traffic passes through
//! 3. icons go to network, failures become an empty image
//! 4. an exhausted failure budget serves cache or an empty placeholder
//! 5. cache-first, then network raced against the timeout, then fallback

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::network::Network;
use crate::budget::RetryBudget;
use crate::cache::{CacheLifecycle, CacheStorage, RequestKey};
use crate::config::FetchConfig;
use crate::error::AgentError;
use crate::http::{same_origin, AgentRequest, AgentResponse, ResponseKind};

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  Network,
  Cache,
  /// Empty stand-in for a load that failed or was suppressed
  Placeholder,
  /// Synthesized offline document
  OfflinePage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
  pub response: AgentResponse,
  pub source: ResponseSource,
}

impl Served {
  fn new(response: AgentResponse, source: ResponseSource) -> Self {
    Self { response, source }
  }
}

/// Outcome of running a request through the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interception {
  /// Not intercepted; the client performs the request itself.
  Passthrough,
  Respond(Served),
}

pub struct FetchPolicy<S: CacheStorage + 'static> {
  origin: Url,
  cache: CacheLifecycle<S>,
  budget: Arc<RetryBudget>,
  network: Arc<dyn Network>,
  timeout: Duration,
  dev_markers: Vec<String>,
  icon_markers: Vec<String>,
  landing_page: RequestKey,
}

impl<S: CacheStorage + 'static> FetchPolicy<S> {
  pub fn new(
    origin: Url,
    cache: CacheLifecycle<S>,
    budget: Arc<RetryBudget>,
    network: Arc<dyn Network>,
    config: &FetchConfig,
    landing_page: &str,
  ) -> Result<Self> {
    let landing_url = origin
      .join(landing_page)
      .map_err(|e| eyre!("Invalid landing page '{}': {}", landing_page, e))?;

    Ok(Self {
      origin,
      cache,
      budget,
      network,
      timeout: config.timeout(),
      dev_markers: config.dev_markers.clone(),
      icon_markers: config.icon_markers.clone(),
      landing_page: RequestKey::get(landing_url.as_str()),
    })
  }

  /// Decide how to answer `request`. Never fails: every branch ends in a
  /// usable response or a passthrough.
  pub async fn handle(&self, request: &AgentRequest) -> Interception {
    if !request.is_read() || !same_origin(&request.url, &self.origin) {
      return Interception::Passthrough;
    }

    // A version that has not activated yet does not intercept.
    if !self.cache.is_active().await {
      return Interception::Passthrough;
    }

    let path = request.url.path();
    if self.dev_markers.iter().any(|m| path.contains(m.as_str())) {
      return Interception::Passthrough;
    }

    if self.icon_markers.iter().any(|m| path.contains(m.as_str())) {
      return Interception::Respond(self.fetch_icon(request).await);
    }

    let endpoint = endpoint_key(&request.url);
    let key = RequestKey::from_request(request);

    if !self.budget.should_attempt(&endpoint) {
      debug!(error = %AgentError::RateLimited(endpoint.clone()), "skipping network");
      return Interception::Respond(self.cached_or_placeholder(&key).await);
    }

    if let Some(cached) = self.lookup(&key).await {
      return Interception::Respond(Served::new(cached, ResponseSource::Cache));
    }

    match self.fetch_with_timeout(request).await {
      Ok(response) => {
        self.budget.record_success(&endpoint);
        if is_cacheable(&response) {
          self.spawn_runtime_write(key, response.clone());
        }
        Interception::Respond(Served::new(response, ResponseSource::Network))
      }
      Err(e) => {
        let failures = self.budget.record_failure(&endpoint);
        warn!(error = %e, endpoint = %endpoint, failures, "network fetch failed");
        Interception::Respond(self.fallback(request).await)
      }
    }
  }

  async fn fetch_with_timeout(&self, request: &AgentRequest) -> Result<AgentResponse, AgentError> {
    // Dropping the losing fetch on timeout cancels it.
    match tokio::time::timeout(self.timeout, self.network.fetch(request)).await {
      Ok(result) => result,
      Err(_) => Err(AgentError::network(
        request.url.as_str(),
        format!("timed out after {:?}", self.timeout),
      )),
    }
  }

  async fn fetch_icon(&self, request: &AgentRequest) -> Served {
    match self.fetch_with_timeout(request).await {
      Ok(response) => Served::new(response, ResponseSource::Network),
      Err(e) => {
        debug!(error = %e, "icon fetch failed, serving empty image");
        Served::new(AgentResponse::image_placeholder(), ResponseSource::Placeholder)
      }
    }
  }

  async fn lookup(&self, key: &RequestKey) -> Option<AgentResponse> {
    match self.cache.lookup(key).await {
      Ok(hit) => hit,
      Err(e) => {
        debug!(error = %e, url = %key.url, "treating cache read failure as a miss");
        None
      }
    }
  }

  async fn cached_or_placeholder(&self, key: &RequestKey) -> Served {
    match self.lookup(key).await {
      Some(cached) => Served::new(cached, ResponseSource::Cache),
      None => Served::new(AgentResponse::placeholder(), ResponseSource::Placeholder),
    }
  }

  async fn fallback(&self, request: &AgentRequest) -> Served {
    if !request.is_document() {
      return Served::new(AgentResponse::placeholder(), ResponseSource::Placeholder);
    }

    match self.lookup(&self.landing_page).await {
      Some(page) => Served::new(page, ResponseSource::Cache),
      None => Served::new(AgentResponse::offline_page(), ResponseSource::OfflinePage),
    }
  }

  /// Store a copy in the Runtime namespace without holding up the response.
  fn spawn_runtime_write(&self, key: RequestKey, response: AgentResponse) {
    let cache = self.cache.clone();
    tokio::spawn(async move {
      if let Err(e) = cache.store_runtime(&key, &response).await {
        debug!(error = %e, url = %key.url, "dropped runtime cache write");
      }
    });
  }
}

/// Failure budgets are tracked per path; the query string is ignored.
fn endpoint_key(url: &Url) -> String {
  url.path().to_string()
}

fn is_cacheable(response: &AgentResponse) -> bool {
  response.status == 200 && response.kind == ResponseKind::Basic
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::budget::ManualClock;
  use crate::cache::{CacheNamespace, CachedEntry, SqliteStorage};
  use crate::fetch::network::fake::{FakeNetwork, Reply};
  use crate::http::Destination;

  const WINDOW: Duration = Duration::from_secs(60);

  struct Harness {
    policy: FetchPolicy<SqliteStorage>,
    network: Arc<FakeNetwork>,
    cache: CacheLifecycle<SqliteStorage>,
    clock: Arc<ManualClock>,
  }

  async fn harness() -> Harness {
    let origin = Url::parse("http://localhost:3000").unwrap();
    let network = Arc::new(FakeNetwork::new());
    let cache = CacheLifecycle::new(SqliteStorage::open_in_memory().unwrap(), "outpost", "v1");
    cache.activate().await.unwrap();
    let clock = ManualClock::new();
    let budget = Arc::new(RetryBudget::with_clock(3, WINDOW, clock.clone()));

    let policy = FetchPolicy::new(
      origin,
      cache.clone(),
      budget,
      network.clone(),
      &FetchConfig::default(),
      "/",
    )
    .unwrap();

    Harness {
      policy,
      network,
      cache,
      clock,
    }
  }

  fn get(path: &str) -> AgentRequest {
    AgentRequest::get(Url::parse("http://localhost:3000").unwrap().join(path).unwrap())
  }

  fn served(interception: Interception) -> Served {
    match interception {
      Interception::Respond(served) => served,
      Interception::Passthrough => panic!("expected a response, got passthrough"),
    }
  }

  async fn wait_for_cache(cache: &CacheLifecycle<SqliteStorage>, key: &RequestKey) -> bool {
    for _ in 0..20 {
      if cache.lookup(key).await.unwrap().is_some() {
        return true;
      }
      tokio::task::yield_now().await;
    }
    false
  }

  #[tokio::test]
  async fn test_non_get_and_cross_origin_pass_through() {
    let h = harness().await;
    let post = AgentRequest::new("POST", Url::parse("http://localhost:3000/api/x").unwrap());
    let foreign = AgentRequest::get(Url::parse("https://cdn.example.com/lib.js").unwrap());

    assert_eq!(h.policy.handle(&post).await, Interception::Passthrough);
    assert_eq!(h.policy.handle(&foreign).await, Interception::Passthrough);
    assert_eq!(h.network.calls(), 0);
  }

  #[tokio::test]
  async fn test_dev_markers_pass_through() {
    let h = harness().await;
    assert_eq!(
      h.policy.handle(&get("/@vite/client")).await,
      Interception::Passthrough
    );
    assert_eq!(
      h.policy.handle(&get("/main.hot-update.json")).await,
      Interception::Passthrough
    );
  }

  #[tokio::test]
  async fn test_requests_before_activation_pass_through() {
    let origin = Url::parse("http://localhost:3000").unwrap();
    let cache = CacheLifecycle::new(SqliteStorage::open_in_memory().unwrap(), "outpost", "v1");
    let policy = FetchPolicy::new(
      origin,
      cache,
      Arc::new(RetryBudget::new(3, WINDOW)),
      Arc::new(FakeNetwork::new()),
      &FetchConfig::default(),
      "/",
    )
    .unwrap();

    assert_eq!(policy.handle(&get("/api/x")).await, Interception::Passthrough);
  }

  #[tokio::test]
  async fn test_icon_failure_becomes_empty_image() {
    let h = harness().await;
    let result = served(h.policy.handle(&get("/favicon.ico")).await);
    assert_eq!(result.source, ResponseSource::Placeholder);
    assert_eq!(result.response.content_type(), Some("image/x-icon"));
    assert!(result.response.body.is_empty());
  }

  #[tokio::test]
  async fn test_cache_first_skips_network() {
    let h = harness().await;
    let key = RequestKey::get("http://localhost:3000/api/items");
    let cached = AgentResponse::new(200, ResponseKind::Basic).with_body("cached");
    h.cache.store_runtime(&key, &cached).await.unwrap();
    h.network.ok("/api/items", "fresh");

    let result = served(h.policy.handle(&get("/api/items")).await);
    assert_eq!(result.source, ResponseSource::Cache);
    assert_eq!(result.response, cached);
    assert_eq!(h.network.calls(), 0);
  }

  #[tokio::test]
  async fn test_network_success_is_cached_in_background() {
    let h = harness().await;
    h.network.ok("/api/items", "fresh");

    let result = served(h.policy.handle(&get("/api/items")).await);
    assert_eq!(result.source, ResponseSource::Network);

    let key = RequestKey::get("http://localhost:3000/api/items");
    assert!(wait_for_cache(&h.cache, &key).await);
  }

  #[tokio::test]
  async fn test_non_200_and_opaque_responses_are_not_cached() {
    let h = harness().await;
    h.network.reply(
      "/api/created",
      Reply::Respond(AgentResponse::new(201, ResponseKind::Basic)),
    );
    h.network.reply(
      "/api/opaque",
      Reply::Respond(AgentResponse::new(200, ResponseKind::Opaque)),
    );

    served(h.policy.handle(&get("/api/created")).await);
    served(h.policy.handle(&get("/api/opaque")).await);

    assert!(!wait_for_cache(&h.cache, &RequestKey::get("http://localhost:3000/api/created")).await);
    assert!(!wait_for_cache(&h.cache, &RequestKey::get("http://localhost:3000/api/opaque")).await);
  }

  #[tokio::test]
  async fn test_document_failure_serves_cached_landing_page() {
    let h = harness().await;
    let landing = AgentResponse::new(200, ResponseKind::Basic).with_body("<h1>home</h1>");
    h.cache
      .store_runtime(&RequestKey::get("http://localhost:3000/"), &landing)
      .await
      .unwrap();

    let request = get("/reports").with_destination(Destination::Document);
    let result = served(h.policy.handle(&request).await);
    assert_eq!(result.source, ResponseSource::Cache);
    assert_eq!(result.response, landing);
  }

  #[tokio::test]
  async fn test_document_failure_without_landing_page_is_offline_page() {
    let h = harness().await;
    let request = get("/reports").with_destination(Destination::Document);
    let result = served(h.policy.handle(&request).await);
    assert_eq!(result.source, ResponseSource::OfflinePage);
    assert!(result.response.content_type().unwrap().starts_with("text/html"));
  }

  #[tokio::test]
  async fn test_other_failure_is_empty_placeholder() {
    let h = harness().await;
    let result = served(h.policy.handle(&get("/api/x")).await);
    assert_eq!(result.source, ResponseSource::Placeholder);
    assert_eq!(result.response.status, 200);
    assert!(result.response.body.is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_timeout_counts_as_failure() {
    let h = harness().await;
    h.network.reply("/api/slow", Reply::Hang);

    let result = served(h.policy.handle(&get("/api/slow")).await);
    assert_eq!(result.source, ResponseSource::Placeholder);
    assert_eq!(h.policy.budget.record("/api/slow").unwrap().retry_count, 1);
  }

  #[tokio::test]
  async fn test_exhausted_budget_skips_network() {
    let h = harness().await;
    for _ in 0..3 {
      served(h.policy.handle(&get("/api/x")).await);
      h.clock.advance(Duration::from_secs(1));
    }
    assert_eq!(h.network.calls(), 3);

    h.network.ok("/api/x", "back");
    let result = served(h.policy.handle(&get("/api/x")).await);
    assert_eq!(result.source, ResponseSource::Placeholder);
    assert_eq!(h.network.calls(), 3);
  }

  #[tokio::test]
  async fn test_exhausted_budget_serves_cache_when_present() {
    let h = harness().await;
    for _ in 0..3 {
      h.policy.budget.record_failure("/api/x");
    }
    let cached = AgentResponse::new(200, ResponseKind::Basic).with_body("stale");
    h.cache
      .store_runtime(&RequestKey::get("http://localhost:3000/api/x?page=2"), &cached)
      .await
      .unwrap();

    let result = served(h.policy.handle(&get("/api/x?page=2")).await);
    assert_eq!(result.source, ResponseSource::Cache);
    assert_eq!(result.response, cached);
    assert_eq!(h.network.calls(), 0);
  }

  #[tokio::test]
  async fn test_budget_resets_after_two_windows() {
    let h = harness().await;
    for _ in 0..3 {
      served(h.policy.handle(&get("/api/x")).await);
    }
    h.network.ok("/api/x", "back");

    h.clock.advance(WINDOW * 2 + Duration::from_secs(1));
    let result = served(h.policy.handle(&get("/api/x")).await);
    assert_eq!(result.source, ResponseSource::Network);
    assert_eq!(h.network.calls(), 4);
    assert!(h.policy.budget.record("/api/x").is_none());
  }

  /// Storage whose reads and writes always fail; namespace bookkeeping works.
  struct BrokenStorage;

  impl CacheStorage for BrokenStorage {
    fn open_namespace(&self, _namespace: &CacheNamespace) -> Result<()> {
      Ok(())
    }

    fn list_namespaces(&self) -> Result<Vec<String>> {
      Ok(Vec::new())
    }

    fn get(&self, _namespace: &str, _key: &RequestKey) -> Result<Option<CachedEntry>> {
      Err(eyre!("disk I/O error"))
    }

    fn put(&self, _: &CacheNamespace, _: &RequestKey, _: &AgentResponse) -> Result<()> {
      Err(eyre!("quota exceeded"))
    }

    fn put_all(&self, _: &CacheNamespace, _: &[(RequestKey, AgentResponse)]) -> Result<()> {
      Err(eyre!("quota exceeded"))
    }

    fn retain_namespaces(&self, _keep: &[&str]) -> Result<Vec<String>> {
      Ok(Vec::new())
    }
  }

  async fn broken_policy(network: Arc<FakeNetwork>) -> FetchPolicy<BrokenStorage> {
    let cache = CacheLifecycle::new(BrokenStorage, "outpost", "v1");
    cache.activate().await.unwrap();
    FetchPolicy::new(
      Url::parse("http://localhost:3000").unwrap(),
      cache,
      Arc::new(RetryBudget::new(3, WINDOW)),
      network,
      &FetchConfig::default(),
      "/",
    )
    .unwrap()
  }

  #[tokio::test]
  async fn test_failing_cache_reads_and_writes_are_swallowed() {
    let network = Arc::new(FakeNetwork::new());
    network.ok("/api/items", "fresh");
    let policy = broken_policy(network.clone()).await;

    let result = served(policy.handle(&get("/api/items")).await);
    assert_eq!(result.source, ResponseSource::Network);
    assert_eq!(result.response.body, b"fresh");

    // Let the background write run and fail.
    for _ in 0..10 {
      tokio::task::yield_now().await;
    }

    // A read error is a miss: the network is asked again, nothing is charged.
    let result = served(policy.handle(&get("/api/items")).await);
    assert_eq!(result.source, ResponseSource::Network);
    assert_eq!(network.calls(), 2);
    assert!(policy.budget.record("/api/items").is_none());
  }

  #[tokio::test]
  async fn test_failing_cache_document_falls_back_to_offline_page() {
    let policy = broken_policy(Arc::new(FakeNetwork::new())).await;
    let request = get("/dashboard").with_destination(Destination::Document);

    let result = served(policy.handle(&request).await);
    assert_eq!(result.source, ResponseSource::OfflinePage);
  }
}
