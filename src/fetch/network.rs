//! Network access behind a trait so the policy engine can be driven by fakes.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use reqwest::Method;
use url::Url;

use crate::error::AgentError;
use crate::http::{same_origin, AgentRequest, AgentResponse, ResponseKind};

/// Something that can perform a request over the network.
pub trait Network: Send + Sync {
  fn fetch<'a>(&'a self, request: &'a AgentRequest)
    -> BoxFuture<'a, Result<AgentResponse, AgentError>>;
}

/// reqwest-backed network client.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
  origin: Url,
}

impl HttpNetwork {
  pub fn new(origin: Url) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("outpost/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, origin })
  }

  async fn send(&self, request: &AgentRequest) -> Result<AgentResponse, AgentError> {
    let url = request.url.as_str();
    let method = Method::from_bytes(request.method.as_bytes())
      .map_err(|e| AgentError::network(url, e))?;

    let response = self
      .client
      .request(method, request.url.clone())
      .send()
      .await
      .map_err(|e| AgentError::network(url, e))?;

    let kind = if same_origin(response.url(), &self.origin) {
      ResponseKind::Basic
    } else {
      ResponseKind::Cors
    };
    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| AgentError::network(url, e))?;

    Ok(AgentResponse {
      status,
      headers,
      body: body.to_vec(),
      kind,
    })
  }
}

impl Network for HttpNetwork {
  fn fetch<'a>(
    &'a self,
    request: &'a AgentRequest,
  ) -> BoxFuture<'a, Result<AgentResponse, AgentError>> {
    Box::pin(self.send(request))
  }
}
