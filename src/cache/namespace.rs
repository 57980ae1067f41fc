//! Namespace and key types for the versioned response cache.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::http::{AgentRequest, AgentResponse};

/// Which bucket a namespace is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
  /// Pre-populated at install time
  Static,
  /// Filled opportunistically from successful fetches
  Runtime,
}

impl NamespaceKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      NamespaceKind::Static => "static",
      NamespaceKind::Runtime => "runtime",
    }
  }
}

impl fmt::Display for NamespaceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A named, versioned bucket of stored responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNamespace {
  pub name: String,
  pub kind: NamespaceKind,
  pub version: String,
}

impl CacheNamespace {
  pub fn new(prefix: &str, kind: NamespaceKind, version: &str) -> Self {
    Self {
      name: format!("{}-{}-{}", prefix, kind, version),
      kind,
      version: version.to_string(),
    }
  }
}

/// The {Static, Runtime} pair that is authoritative for one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSet {
  pub static_ns: CacheNamespace,
  pub runtime_ns: CacheNamespace,
}

impl ActiveSet {
  pub fn for_version(prefix: &str, version: &str) -> Self {
    Self {
      static_ns: CacheNamespace::new(prefix, NamespaceKind::Static, version),
      runtime_ns: CacheNamespace::new(prefix, NamespaceKind::Runtime, version),
    }
  }

  pub fn names(&self) -> [&str; 2] {
    [&self.static_ns.name, &self.runtime_ns.name]
  }
}

/// Identity of a cached response: method plus absolute URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  pub method: String,
  pub url: String,
}

impl RequestKey {
  pub fn get(url: &str) -> Self {
    Self {
      method: "GET".to_string(),
      url: url.to_string(),
    }
  }

  pub fn from_request(request: &AgentRequest) -> Self {
    Self {
      method: request.method.clone(),
      url: request.url.to_string(),
    }
  }

  /// SHA256 of "METHOD URL", hex encoded, for a stable fixed-length row key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A stored request/response pair.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub key: RequestKey,
  pub response: AgentResponse,
  pub cached_at: DateTime<Utc>,
}
