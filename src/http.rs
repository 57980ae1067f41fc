//! Request and response types shared by the fetch policy and the cache.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Minimal page served when a document cannot be loaded from network or cache.
pub const OFFLINE_PAGE: &str = "<!DOCTYPE html>\
<html><head><meta charset=\"utf-8\"><title>Offline</title></head>\
<body><h1>You are offline</h1>\
<p>This page is not available right now. Check your connection and try again.</p>\
</body></html>";

/// What kind of resource the client is loading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
  /// Top-level page navigation
  Document,
  Image,
  Script,
  Style,
  Font,
  /// fetch()/XHR and anything else
  #[default]
  #[serde(other)]
  Other,
}

/// An intercepted outbound request.
#[derive(Debug, Clone)]
pub struct AgentRequest {
  pub method: String,
  pub url: Url,
  pub destination: Destination,
}

impl AgentRequest {
  pub fn new(method: &str, url: Url) -> Self {
    Self {
      method: method.to_uppercase(),
      url,
      destination: Destination::Other,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new("GET", url)
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn is_read(&self) -> bool {
    self.method == "GET"
  }

  pub fn is_document(&self) -> bool {
    self.destination == Destination::Document
  }
}

/// How a response relates to the origin the agent serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
  /// Same-origin response with readable body and headers
  Basic,
  /// Cross-origin response allowed by CORS
  Cors,
  /// Cross-origin response whose contents are hidden
  Opaque,
}

impl ResponseKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ResponseKind::Basic => "basic",
      ResponseKind::Cors => "cors",
      ResponseKind::Opaque => "opaque",
    }
  }
}

impl fmt::Display for ResponseKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ResponseKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "basic" => Ok(ResponseKind::Basic),
      "cors" => Ok(ResponseKind::Cors),
      "opaque" => Ok(ResponseKind::Opaque),
      other => Err(format!("unknown response kind: {}", other)),
    }
  }
}

/// A response handed back to the client, whether fetched, cached or synthesized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub kind: ResponseKind,
}

impl AgentResponse {
  pub fn new(status: u16, kind: ResponseKind) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: Vec::new(),
      kind,
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_lowercase(), value.to_string()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = body.into();
    self
  }

  /// Empty 200 used wherever a failed load must still look like a success.
  pub fn placeholder() -> Self {
    Self::new(200, ResponseKind::Basic).with_header("content-type", "text/plain")
  }

  /// Empty image stand-in for icons that could not be loaded.
  pub fn image_placeholder() -> Self {
    Self::new(200, ResponseKind::Basic).with_header("content-type", "image/x-icon")
  }

  pub fn offline_page() -> Self {
    Self::new(200, ResponseKind::Basic)
      .with_header("content-type", "text/html; charset=utf-8")
      .with_body(OFFLINE_PAGE)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn content_type(&self) -> Option<&str> {
    self.header("content-type")
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Whether two URLs share scheme, host and port.
pub fn same_origin(a: &Url, b: &Url) -> bool {
  a.origin() == b.origin()
}
