//! Failure taxonomy for the request and notification paths.
//!
//! None of these ever reach the hosting client: the fetch policy turns each
//! one into a fallback response and the notification path degrades to defaults.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
  /// Timeout or connection error
  #[error("network request to {url} failed: {reason}")]
  TransientNetworkFailure { url: String, reason: String },

  /// Storage rejected a write (e.g. quota exceeded)
  #[error("cache write failed: {0}")]
  CacheWriteFailure(String),

  #[error("cache read failed: {0}")]
  CacheReadFailure(String),

  /// The endpoint's failure budget denies a network attempt
  #[error("failure budget exhausted for {0}")]
  RateLimited(String),

  #[error("malformed push payload: {0}")]
  PayloadParseFailure(String),
}

impl AgentError {
  pub fn network(url: impl Into<String>, reason: impl ToString) -> Self {
    AgentError::TransientNetworkFailure {
      url: url.into(),
      reason: reason.to_string(),
    }
  }
}
