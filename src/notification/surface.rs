//! Capabilities the host exposes for showing notifications and driving windows.

use color_eyre::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::renderer::RenderedNotification;

/// An open client window or tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceInfo {
  pub id: String,
  pub url: String,
  #[serde(default)]
  pub focused: bool,
}

/// Window registry: list, focus, navigate, open.
pub trait PresentationSurface: Send + Sync {
  fn list(&self) -> BoxFuture<'_, Result<Vec<SurfaceInfo>>>;

  fn focus<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<()>>;

  fn navigate<'a>(&'a self, id: &'a str, url: &'a str) -> BoxFuture<'a, Result<()>>;

  fn open<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// OS-level notification display.
pub trait NotificationDisplay: Send + Sync {
  fn show<'a>(&'a self, notification: &'a RenderedNotification) -> BoxFuture<'a, Result<()>>;

  fn close<'a>(&'a self, tag: &'a str) -> BoxFuture<'a, Result<()>>;
}
