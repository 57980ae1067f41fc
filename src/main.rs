mod agent;
mod budget;
mod cache;
mod config;
mod error;
mod event;
mod fetch;
mod host;
mod http;
mod notification;
mod sync;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::agent::{Agent, AgentEvent, EventOutcome, HostCapabilities};
use crate::cache::SqliteStorage;
use crate::fetch::{HttpNetwork, Interception};
use crate::http::{AgentRequest, Destination};
use crate::sync::{HttpFlushStore, NoopStore, PendingWriteStore};

#[derive(Parser, Debug)]
#[command(name = "outpost")]
#[command(about = "Offline-first background agent for a web client")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/outpost/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Application origin, e.g. https://app.example.com
  #[arg(short, long)]
  origin: Option<String>,

  /// Also write daily-rotated logs to this directory
  #[arg(long)]
  log_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Serve host events over stdin/stdout (default)
  Serve,
  /// Populate and activate the cache for the configured version
  Install,
  /// Run one GET request through the fetch policy
  Fetch {
    url: String,
    /// Treat the request as a document navigation
    #[arg(long)]
    document: bool,
  },
  /// Render a push payload and print the notification
  Render { payload: String },
}

fn init_logging(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  // stdout carries the host protocol, so console logs go to stderr.
  let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);

  let (file_layer, guard) = match log_dir {
    Some(dir) => {
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
      let appender = tracing_appender::rolling::daily(dir, "outpost.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let layer = fmt::layer().with_writer(writer).with_ansi(false);
      (Some(layer), Some(guard))
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(stderr_layer)
    .with(file_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_logging(args.log_dir.as_deref())?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override origin if specified on command line
  let config = if let Some(origin) = args.origin {
    config::Config { origin, ..config }
  } else {
    config
  };
  let origin = config.origin_url()?;

  let database = config.database_path()?;
  info!(origin = %origin, database = %database.display(), version = %config.cache.version, "starting outpost");
  let storage = SqliteStorage::open(&database)?;

  let store: Arc<dyn PendingWriteStore> = match &config.sync.flush_url {
    Some(url) => Arc::new(HttpFlushStore::new(url)),
    None => Arc::new(NoopStore),
  };
  let network = Arc::new(HttpNetwork::new(origin.clone())?);
  let (outbox, commands) = host::HostOutbox::new();

  let agent = Agent::new(
    &config,
    storage,
    HostCapabilities {
      network,
      display: outbox.clone(),
      surfaces: outbox.clone(),
      store,
    },
  )?;

  match args.command.unwrap_or(Command::Serve) {
    Command::Serve => {
      let writer = host::spawn_writer(commands, tokio::io::stdout());
      host::run_bridge(Arc::new(agent), outbox, event::EventSource::stdin()).await?;
      // Give in-flight responses a moment to reach the host. Pending snooze
      // timers keep senders alive, so don't wait for the channel to close.
      let _ = tokio::time::timeout(std::time::Duration::from_secs(2), writer).await;
    }
    Command::Install => {
      for event in [AgentEvent::Install, AgentEvent::Activate] {
        match agent.dispatch(event).await {
          EventOutcome::Installed { routes } => println!("installed {} routes", routes),
          EventOutcome::Activated { purged } => {
            println!("activated; purged {} stale namespaces", purged.len());
            for name in purged {
              println!("  {}", name);
            }
          }
          EventOutcome::LifecycleFailed { stage, reason } => {
            return Err(eyre!("{} failed: {}", stage, reason));
          }
          other => return Err(eyre!("Unexpected outcome: {:?}", other)),
        }
      }
    }
    Command::Fetch { url, document } => {
      if let EventOutcome::LifecycleFailed { reason, .. } =
        agent.dispatch(AgentEvent::Activate).await
      {
        return Err(eyre!("activate failed: {}", reason));
      }

      let url = origin
        .join(&url)
        .map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?;
      let destination = if document {
        Destination::Document
      } else {
        Destination::Other
      };
      let request = AgentRequest::get(url).with_destination(destination);

      match agent.dispatch(AgentEvent::Fetch(request)).await {
        EventOutcome::Fetched(Interception::Passthrough) => println!("passthrough"),
        EventOutcome::Fetched(Interception::Respond(served)) => {
          println!(
            "{} ({:?}) {}",
            served.response.status,
            served.source,
            served.response.content_type().unwrap_or("-")
          );
          for (name, value) in &served.response.headers {
            println!("{}: {}", name, value);
          }
          println!();
          println!("{}", String::from_utf8_lossy(&served.response.body));
        }
        other => return Err(eyre!("Unexpected outcome: {:?}", other)),
      }
    }
    Command::Render { payload } => {
      let notification = agent
        .renderer()
        .render_push(Some(&serde_json::Value::String(payload)));
      let json = serde_json::to_string_pretty(&notification)
        .map_err(|e| eyre!("Failed to serialize notification: {}", e))?;
      println!("{}", json);
    }
  }

  Ok(())
}
