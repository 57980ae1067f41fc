use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use url::Url;

use crate::agent::AgentEvent;
use crate::http::{AgentRequest, Destination};
use crate::notification::{ActionEvent, RenderedNotification, SurfaceInfo};

/// Events as the host sends them, one JSON object per line.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
  Install,
  Activate,
  Fetch {
    /// Echoed back on the response so the host can match it up
    #[serde(default)]
    id: Option<String>,
    #[serde(default = "default_method")]
    method: String,
    url: String,
    #[serde(default)]
    destination: Destination,
  },
  Push {
    #[serde(default)]
    data: Option<Value>,
  },
  Click {
    #[serde(default)]
    action: String,
    notification: RenderedNotification,
  },
  Sync {
    tag: String,
  },
  /// Current set of open client windows
  Clients {
    windows: Vec<SurfaceInfo>,
  },
}

fn default_method() -> String {
  "GET".to_string()
}

impl HostEvent {
  /// Convert to an agent event. `Clients` is host bookkeeping and has no
  /// agent counterpart.
  pub fn into_agent_event(self, origin: &Url) -> Result<Option<AgentEvent>> {
    let event = match self {
      HostEvent::Install => AgentEvent::Install,
      HostEvent::Activate => AgentEvent::Activate,
      HostEvent::Fetch {
        method,
        url,
        destination,
        ..
      } => {
        // Relative URLs are resolved against the origin; absolute ones stay as-is.
        let url = origin
          .join(&url)
          .map_err(|e| eyre!("Invalid request URL '{}': {}", url, e))?;
        AgentEvent::Fetch(AgentRequest::new(&method, url).with_destination(destination))
      }
      HostEvent::Push { data } => AgentEvent::Push(data),
      HostEvent::Click {
        action,
        notification,
      } => AgentEvent::NotificationClick(ActionEvent {
        action,
        notification,
      }),
      HostEvent::Sync { tag } => AgentEvent::Sync(tag),
      HostEvent::Clients { .. } => return Ok(None),
    };
    Ok(Some(event))
  }
}

/// Produces host events from a line-oriented JSON stream.
pub struct EventSource {
  rx: mpsc::UnboundedReceiver<HostEvent>,
}

impl EventSource {
  pub fn stdin() -> Self {
    Self::from_reader(tokio::io::stdin())
  }

  /// Spawn a reader task over `reader`. Lines that do not parse are logged
  /// and skipped.
  pub fn from_reader<R>(reader: R) -> Self
  where
    R: AsyncRead + Unpin + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      let mut lines = BufReader::new(reader).lines();
      loop {
        match lines.next_line().await {
          Ok(Some(line)) => {
            let trimmed = line.trim();
            if trimmed.is_empty() {
              continue;
            }
            match serde_json::from_str::<HostEvent>(trimmed) {
              Ok(event) => {
                if tx.send(event).is_err() {
                  break;
                }
              }
              Err(e) => warn!(error = %e, raw_line = %trimmed, "failed to parse host event"),
            }
          }
          Ok(None) => {
            info!("event stream closed");
            break;
          }
          Err(e) => {
            warn!(error = %e, "failed to read event stream");
            break;
          }
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<HostEvent> {
    self.rx.recv().await
  }
}
