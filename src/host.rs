//! Stdin/stdout bridge between the agent and its hosting client.
//!
//! Host events come in as newline-delimited JSON on stdin. Responses and
//! requests for the host (show a notification, focus a window, ...) go out
//! as newline-delimited JSON on stdout. Logs never go to stdout.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentEvent, EventOutcome};
use crate::cache::CacheStorage;
use crate::event::{EventSource, HostEvent};
use crate::fetch::{Interception, ResponseSource};
use crate::http::AgentResponse;
use crate::notification::{
  NotificationDisplay, PresentationSurface, RenderedNotification, RouteOutcome, SurfaceInfo,
};
use crate::sync::SyncOutcome;

/// Messages written to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum HostCommand {
  Respond {
    id: Option<String>,
    status: u16,
    headers: Vec<(String, String)>,
    /// `utf8` or `hex`
    encoding: &'static str,
    body: String,
    source: &'static str,
  },
  /// The host should perform the request itself
  Passthrough { id: Option<String> },
  ShowNotification { notification: RenderedNotification },
  CloseNotification { tag: String },
  Focus { window: String },
  Navigate { window: String, url: String },
  OpenWindow { url: String },
  Installed { routes: usize },
  Activated { purged: Vec<String> },
  Synced { outcome: &'static str },
  Error { message: String },
}

impl HostCommand {
  fn respond(id: Option<String>, response: AgentResponse, source: ResponseSource) -> Self {
    let (encoding, body) = match String::from_utf8(response.body) {
      Ok(text) => ("utf8", text),
      Err(e) => ("hex", hex::encode(e.into_bytes())),
    };
    HostCommand::Respond {
      id,
      status: response.status,
      headers: response.headers,
      encoding,
      body,
      source: source_name(source),
    }
  }
}

fn source_name(source: ResponseSource) -> &'static str {
  match source {
    ResponseSource::Network => "network",
    ResponseSource::Cache => "cache",
    ResponseSource::Placeholder => "placeholder",
    ResponseSource::OfflinePage => "offline_page",
  }
}

fn sync_name(outcome: SyncOutcome) -> &'static str {
  match outcome {
    SyncOutcome::Flushed => "flushed",
    SyncOutcome::Failed => "failed",
    SyncOutcome::Ignored => "ignored",
  }
}

/// The host side of the agent's display and window capabilities.
///
/// Commands are queued on a channel and written out by [`spawn_writer`].
/// The window list is whatever the host last reported with a `clients` event.
pub struct HostOutbox {
  tx: mpsc::UnboundedSender<HostCommand>,
  windows: Mutex<Vec<SurfaceInfo>>,
}

impl HostOutbox {
  pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<HostCommand>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let outbox = Arc::new(Self {
      tx,
      windows: Mutex::new(Vec::new()),
    });
    (outbox, rx)
  }

  pub fn send(&self, command: HostCommand) -> Result<()> {
    self
      .tx
      .send(command)
      .map_err(|_| eyre!("Host output channel closed"))
  }

  pub fn set_windows(&self, windows: Vec<SurfaceInfo>) {
    debug!(count = windows.len(), "client windows updated");
    *self.windows() = windows;
  }

  fn windows(&self) -> MutexGuard<'_, Vec<SurfaceInfo>> {
    self.windows.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Turn an event outcome into whatever the host needs to hear about it.
  pub fn report(&self, id: Option<String>, outcome: EventOutcome) -> Result<()> {
    let command = match outcome {
      EventOutcome::Installed { routes } => HostCommand::Installed { routes },
      EventOutcome::Activated { purged } => HostCommand::Activated { purged },
      EventOutcome::LifecycleFailed { stage, reason } => HostCommand::Error {
        message: format!("{} failed: {}", stage, reason),
      },
      EventOutcome::Fetched(Interception::Passthrough) => HostCommand::Passthrough { id },
      EventOutcome::Fetched(Interception::Respond(served)) => {
        HostCommand::respond(id, served.response, served.source)
      }
      EventOutcome::Synced(outcome) => HostCommand::Synced {
        outcome: sync_name(outcome),
      },
      EventOutcome::Routed(RouteOutcome::Failed { reason }) => {
        HostCommand::Error { message: reason }
      }
      // Already visible to the host through show/focus/open commands.
      EventOutcome::Displayed(_) | EventOutcome::Routed(_) => return Ok(()),
    };
    self.send(command)
  }
}

impl NotificationDisplay for HostOutbox {
  fn show<'a>(&'a self, notification: &'a RenderedNotification) -> BoxFuture<'a, Result<()>> {
    let result = self.send(HostCommand::ShowNotification {
      notification: notification.clone(),
    });
    Box::pin(async move { result })
  }

  fn close<'a>(&'a self, tag: &'a str) -> BoxFuture<'a, Result<()>> {
    let result = self.send(HostCommand::CloseNotification {
      tag: tag.to_string(),
    });
    Box::pin(async move { result })
  }
}

impl PresentationSurface for HostOutbox {
  fn list(&self) -> BoxFuture<'_, Result<Vec<SurfaceInfo>>> {
    let windows = self.windows().clone();
    Box::pin(async move { Ok(windows) })
  }

  fn focus<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<()>> {
    for window in self.windows().iter_mut() {
      window.focused = window.id == id;
    }
    let result = self.send(HostCommand::Focus {
      window: id.to_string(),
    });
    Box::pin(async move { result })
  }

  fn navigate<'a>(&'a self, id: &'a str, url: &'a str) -> BoxFuture<'a, Result<()>> {
    let result = self.send(HostCommand::Navigate {
      window: id.to_string(),
      url: url.to_string(),
    });
    Box::pin(async move { result })
  }

  fn open<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<()>> {
    let result = self.send(HostCommand::OpenWindow {
      url: url.to_string(),
    });
    Box::pin(async move { result })
  }
}

/// Write queued commands to `writer` as JSON lines until every sender is gone.
pub fn spawn_writer<W>(
  mut rx: mpsc::UnboundedReceiver<HostCommand>,
  writer: W,
) -> tokio::task::JoinHandle<()>
where
  W: AsyncWrite + Unpin + Send + 'static,
{
  tokio::spawn(async move {
    let mut writer = BufWriter::new(writer);
    while let Some(command) = rx.recv().await {
      let json = match serde_json::to_string(&command) {
        Ok(json) => json,
        Err(e) => {
          warn!(error = %e, "failed to serialize host command; skipping");
          continue;
        }
      };
      let written = async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
      };
      if let Err(e) = written.await {
        warn!(error = %e, "failed to write to host; stopping writer");
        break;
      }
    }
  })
}

/// Feed host events to the agent until the event stream ends.
///
/// Install and activate run to completion before the next event is read, so
/// no request is handled against a half-activated cache. Everything else runs
/// as its own task, letting many fetches be in flight at once.
///
/// When the event stream ends, every handler still running is awaited before
/// returning. Snooze timers are not handlers and may outlive the bridge.
pub async fn run_bridge<S: CacheStorage + 'static>(
  agent: Arc<Agent<S>>,
  outbox: Arc<HostOutbox>,
  mut events: EventSource,
) -> Result<()> {
  info!(origin = %agent.origin(), "host bridge running");
  let mut handlers = JoinSet::new();

  while let Some(event) = events.next().await {
    // Reap finished handlers so the set doesn't grow without bound.
    while handlers.try_join_next().is_some() {}

    let (is_fetch, id) = match &event {
      HostEvent::Fetch { id, .. } => (true, id.clone()),
      _ => (false, None),
    };

    let agent_event = match event {
      HostEvent::Clients { windows } => {
        outbox.set_windows(windows);
        continue;
      }
      other => match other.into_agent_event(agent.origin()) {
        Ok(Some(agent_event)) => agent_event,
        Ok(None) => continue,
        Err(e) => {
          warn!(error = %e, request_id = ?id, "rejected host event");
          // The host is waiting on an answer for every fetch.
          let command = if is_fetch {
            HostCommand::Passthrough { id }
          } else {
            HostCommand::Error {
              message: e.to_string(),
            }
          };
          outbox.send(command)?;
          continue;
        }
      },
    };

    if matches!(agent_event, AgentEvent::Install | AgentEvent::Activate) {
      let outcome = agent.dispatch(agent_event).await;
      outbox.report(id, outcome)?;
      continue;
    }

    let agent = Arc::clone(&agent);
    let outbox = Arc::clone(&outbox);
    handlers.spawn(async move {
      let outcome = agent.dispatch(agent_event).await;
      if let Err(e) = outbox.report(id, outcome) {
        warn!(error = %e, "dropped event outcome");
      }
    });
  }

  if !handlers.is_empty() {
    info!(pending = handlers.len(), "event stream closed, finishing in-flight handlers");
  }
  while let Some(result) = handlers.join_next().await {
    if let Err(e) = result {
      warn!(error = %e, "event handler panicked");
    }
  }

  info!("host bridge stopped");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::agent::HostCapabilities;
  use crate::cache::SqliteStorage;
  use crate::config::Config;
  use crate::fetch::network::fake::{FakeNetwork, Reply};
  use crate::sync::NoopStore;
  use serde_json::json;

  fn agent(outbox: &Arc<HostOutbox>, network: Arc<FakeNetwork>) -> Arc<Agent<SqliteStorage>> {
    Arc::new(
      Agent::new(
        &Config::default(),
        SqliteStorage::open_in_memory().unwrap(),
        HostCapabilities {
          network,
          display: outbox.clone(),
          surfaces: outbox.clone(),
          store: Arc::new(NoopStore),
        },
      )
      .unwrap(),
    )
  }

  async fn drain(rx: &mut mpsc::UnboundedReceiver<HostCommand>, n: usize) -> Vec<HostCommand> {
    let mut out = Vec::new();
    for _ in 0..n {
      match tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv()).await {
        Ok(Some(command)) => out.push(command),
        _ => break,
      }
    }
    out
  }

  #[test]
  fn test_binary_bodies_are_hex_encoded() {
    let response = AgentResponse::image_placeholder().with_body(vec![0xff, 0x00]);
    let HostCommand::Respond { encoding, body, .. } =
      HostCommand::respond(Some("r1".to_string()), response, ResponseSource::Network)
    else {
      panic!("expected a respond command");
    };
    assert_eq!(encoding, "hex");
    assert_eq!(body, "ff00");
  }

  #[test]
  fn test_command_wire_format() {
    let value = serde_json::to_value(HostCommand::Navigate {
      window: "w1".to_string(),
      url: "/dashboard".to_string(),
    })
    .unwrap();
    assert_eq!(
      value,
      json!({"command": "navigate", "window": "w1", "url": "/dashboard"})
    );
  }

  #[tokio::test]
  async fn test_focus_marks_window_focused() {
    let (outbox, mut rx) = HostOutbox::new();
    outbox.set_windows(vec![
      SurfaceInfo {
        id: "a".to_string(),
        url: "http://localhost:3000/".to_string(),
        focused: true,
      },
      SurfaceInfo {
        id: "b".to_string(),
        url: "http://localhost:3000/dashboard".to_string(),
        focused: false,
      },
    ]);

    outbox.focus("b").await.unwrap();

    let windows = outbox.list().await.unwrap();
    assert!(!windows[0].focused);
    assert!(windows[1].focused);
    assert_eq!(
      rx.recv().await,
      Some(HostCommand::Focus {
        window: "b".to_string()
      })
    );
  }

  #[tokio::test]
  async fn test_bridge_round_trip() {
    let (outbox, mut rx) = HostOutbox::new();
    let network = Arc::new(FakeNetwork::new());
    network.ok("/", "home");
    network.ok("/dashboard", "dash");
    network.ok("/offline", "offline");
    let agent = agent(&outbox, network);

    let input = [
      json!({"event": "install"}),
      json!({"event": "activate"}),
      json!({"event": "fetch", "id": "r1", "url": "/dashboard", "destination": "document"}),
      json!({"event": "fetch", "id": "r2", "method": "POST", "url": "/api/items"}),
    ]
    .iter()
    .map(|v| v.to_string())
    .collect::<Vec<_>>()
    .join("\n");
    let events = EventSource::from_reader(std::io::Cursor::new(input.into_bytes()));

    run_bridge(agent, outbox, events).await.unwrap();
    let commands = drain(&mut rx, 4).await;

    assert_eq!(commands[0], HostCommand::Installed { routes: 3 });
    assert_eq!(commands[1], HostCommand::Activated { purged: vec![] });
    assert!(commands[2..].contains(&HostCommand::Passthrough {
      id: Some("r2".to_string())
    }));
    assert!(commands[2..].iter().any(|c| matches!(
      c,
      HostCommand::Respond { id: Some(id), body, source: "cache", .. } if id == "r1" && body == "dash"
    )));
  }

  #[tokio::test]
  async fn test_bridge_push_then_click_opens_window() {
    let (outbox, mut rx) = HostOutbox::new();
    let agent = agent(&outbox, Arc::new(FakeNetwork::new()));

    let notification = agent
      .renderer()
      .render_push(Some(&json!({"title": "Stock low", "url": "/stock", "tag": "stock"})));
    let input = [
      json!({"event": "clients", "windows": []}),
      json!({"event": "click", "action": "open", "notification": notification}),
    ]
    .iter()
    .map(|v| v.to_string())
    .collect::<Vec<_>>()
    .join("\n");
    let events = EventSource::from_reader(std::io::Cursor::new(input.into_bytes()));

    run_bridge(agent, outbox, events).await.unwrap();
    let commands = drain(&mut rx, 2).await;

    assert_eq!(
      commands,
      vec![
        HostCommand::CloseNotification {
          tag: "stock".to_string()
        },
        HostCommand::OpenWindow {
          url: "/stock".to_string()
        },
      ]
    );
  }

  fn events(lines: &[serde_json::Value]) -> EventSource {
    let input = lines
      .iter()
      .map(|v| v.to_string())
      .collect::<Vec<_>>()
      .join("\n");
    EventSource::from_reader(std::io::Cursor::new(input.into_bytes()))
  }

  fn received(rx: &mut mpsc::UnboundedReceiver<HostCommand>) -> Vec<HostCommand> {
    let mut out = Vec::new();
    while let Ok(command) = rx.try_recv() {
      out.push(command);
    }
    out
  }

  #[tokio::test(start_paused = true)]
  async fn test_in_flight_fetch_answered_after_input_closes() {
    let (outbox, mut rx) = HostOutbox::new();
    let network = Arc::new(FakeNetwork::new());
    network.ok("/", "home");
    network.ok("/dashboard", "dash");
    network.ok("/offline", "offline");
    network.reply("/api/slow", Reply::Hang);
    let agent = agent(&outbox, network);

    let input = events(&[
      json!({"event": "install"}),
      json!({"event": "activate"}),
      json!({"event": "fetch", "id": "slow-1", "url": "/api/slow"}),
    ]);
    run_bridge(agent, outbox, input).await.unwrap();

    // The hung fetch times out and falls back before the bridge returns.
    let commands = received(&mut rx);
    assert_eq!(commands.len(), 3);
    assert!(matches!(
      &commands[2],
      HostCommand::Respond { id: Some(id), source: "placeholder", .. } if id == "slow-1"
    ));
  }

  #[tokio::test]
  async fn test_unresolvable_fetch_url_is_passed_through_with_id() {
    let (outbox, mut rx) = HostOutbox::new();
    let agent = agent(&outbox, Arc::new(FakeNetwork::new()));

    let input = events(&[
      json!({"event": "fetch", "id": "r9", "url": "http://[bad"}),
      json!({"event": "sync", "tag": "sync-pending-writes"}),
    ]);
    run_bridge(agent, outbox, input).await.unwrap();

    let commands = received(&mut rx);
    assert_eq!(
      commands,
      vec![
        HostCommand::Passthrough {
          id: Some("r9".to_string())
        },
        HostCommand::Synced { outcome: "flushed" },
      ]
    );
  }
}
