//! Routes user interaction with a displayed notification.

use color_eyre::Result;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::renderer::{RenderedNotification, Renderer};
use super::surface::{NotificationDisplay, PresentationSurface};

/// A click on a notification or one of its buttons.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionEvent {
  /// Button id; empty for a click on the notification body
  #[serde(default)]
  pub action: String,
  pub notification: RenderedNotification,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
  /// Dismissed or closed, nothing else to do
  Closed,
  /// A follow-up is scheduled after `delay`
  Snoozed { tag: String, delay: Duration },
  Acknowledged,
  /// An existing window was focused and sent to `url`
  Focused { window: String, url: String },
  Opened { url: String },
  /// The window operation failed; the notification is still closed
  Failed { reason: String },
}

pub struct ActionRouter {
  renderer: Renderer,
  display: Arc<dyn NotificationDisplay>,
  surfaces: Arc<dyn PresentationSurface>,
  home_marker: String,
  snooze_delay: Duration,
}

impl ActionRouter {
  pub fn new(
    renderer: Renderer,
    display: Arc<dyn NotificationDisplay>,
    surfaces: Arc<dyn PresentationSurface>,
    home_marker: &str,
    snooze_delay: Duration,
  ) -> Self {
    Self {
      renderer,
      display,
      surfaces,
      home_marker: home_marker.to_string(),
      snooze_delay,
    }
  }

  pub async fn route(&self, event: &ActionEvent) -> RouteOutcome {
    let notification = &event.notification;

    // Every interaction closes the notification first.
    if let Err(e) = self.display.close(&notification.tag).await {
      warn!(error = %e, tag = %notification.tag, "failed to close notification");
    }

    match event.action.as_str() {
      "dismiss" | "close" => RouteOutcome::Closed,
      "snooze" => {
        self.schedule_snooze(notification);
        RouteOutcome::Snoozed {
          tag: notification.tag.clone(),
          delay: self.snooze_delay,
        }
      }
      "acknowledge" => {
        debug!(tag = %notification.tag, "notification acknowledged");
        RouteOutcome::Acknowledged
      }
      _ => match self.focus_or_open(&notification.data.url).await {
        Ok(outcome) => outcome,
        Err(e) => {
          warn!(error = %e, url = %notification.data.url, "failed to route notification click");
          RouteOutcome::Failed {
            reason: e.to_string(),
          }
        }
      },
    }
  }

  /// Show the snoozed follow-up after the delay.
  ///
  /// The timer lives only in this process; if the process exits first the
  /// follow-up is lost.
  fn schedule_snooze(&self, notification: &RenderedNotification) {
    let follow_up = self.renderer.snoozed(notification);
    let display = Arc::clone(&self.display);
    let delay = self.snooze_delay;

    tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      match display.show(&follow_up).await {
        Ok(()) => info!(tag = %follow_up.tag, "snoozed notification shown"),
        Err(e) => warn!(error = %e, tag = %follow_up.tag, "failed to show snoozed notification"),
      }
    });
  }

  async fn focus_or_open(&self, url: &str) -> Result<RouteOutcome> {
    let windows = self.surfaces.list().await?;

    if let Some(window) = windows
      .iter()
      .find(|w| w.url.contains(self.home_marker.as_str()))
    {
      self.surfaces.focus(&window.id).await?;
      self.surfaces.navigate(&window.id, url).await?;
      return Ok(RouteOutcome::Focused {
        window: window.id.clone(),
        url: url.to_string(),
      });
    }

    self.surfaces.open(url).await?;
    Ok(RouteOutcome::Opened {
      url: url.to_string(),
    })
  }
}
