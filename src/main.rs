mod cache;
mod config;
mod host;
mod http;
mod net;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use cache::{CacheStorage, SqliteStorage, WorkerState};
use host::ConsoleHost;
use http::Request;
use net::{HttpNetwork, Network, OfflineNetwork};
use worker::{ControlMessage, Event, EventOutcome, FetchOutcome, SyncReport, Worker};

#[derive(Parser, Debug)]
#[command(name = "offline-worker")]
#[command(about = "Network-first offline cache worker for the tutoring platform site")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-worker/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Treat the network as unreachable
  #[arg(long, global = true)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache critical resources, then activate if allowed
  Install,
  /// Activate the installed version and purge old caches
  Activate,
  /// Fetch a URL through the worker
  Fetch {
    url: String,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
  },
  /// Deliver a push message
  Push { payload: Option<String> },
  /// Click a notification action
  Click {
    #[arg(long)]
    action: Option<String>,
  },
  /// Fire a background sync event
  Sync {
    /// Sync tag (defaults to the configured one)
    #[arg(long)]
    tag: Option<String>,
  },
  /// Post a control message, e.g. '{"type":"SKIP_WAITING"}'
  Message { json: String },
  /// Queue a form submission for the next background sync
  Enqueue {
    url: String,
    #[arg(long, default_value = "POST")]
    method: String,
    #[arg(long)]
    body: Option<String>,
    #[arg(long, default_value = "application/x-www-form-urlencoded")]
    content_type: String,
  },
  /// List caches and their entries
  Caches,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_tracing()?;

  let config = config::Config::load(args.config.as_deref())?;
  let worker_config = Arc::new(config.worker_config()?);
  let storage = Arc::new(SqliteStorage::open(&config.storage_path()?)?);

  if args.offline {
    let worker = Worker::new(worker_config, storage, Arc::new(OfflineNetwork), Arc::new(ConsoleHost));
    run(&worker, args.command).await
  } else {
    let worker = Worker::new(
      worker_config,
      storage,
      Arc::new(HttpNetwork::new()?),
      Arc::new(ConsoleHost),
    );
    run(&worker, args.command).await
  }
}

/// Log to a daily file in the data directory; stdout is for command output.
fn init_tracing() -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = config::data_dir()?.join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&log_dir, "offline-worker.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_env("OFFLINE_WORKER_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
    )
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

async fn run<N: Network + 'static>(
  worker: &Worker<SqliteStorage, N, ConsoleHost>,
  command: Command,
) -> Result<()> {
  match command {
    Command::Install => {
      let state = lifecycle(worker.handle(Event::Install).await?)?;
      println!("{}: {}", worker.config().cache_name, state);
      if state == WorkerState::Installed {
        let state = lifecycle(worker.handle(Event::Activate).await?)?;
        println!("{}: {}", worker.config().cache_name, state);
      }
    }
    Command::Activate => {
      let state = lifecycle(worker.handle(Event::Activate).await?)?;
      println!("{}: {}", worker.config().cache_name, state);
    }
    Command::Fetch { url, navigate } => {
      let url = worker
        .config()
        .origin
        .join(&url)
        .map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?;
      let request = if navigate {
        Request::navigate(url)
      } else {
        Request::get(url)
      };

      match worker.handle(Event::Fetch(request)).await? {
        EventOutcome::Fetch(FetchOutcome::Respond {
          mut response,
          source,
        }) => {
          println!("{} {} ({:?})", response.status, response.status_text, source);
          for (name, value) in &response.headers {
            println!("{}: {}", name, value);
          }
          println!();
          println!("{}", String::from_utf8_lossy(&response.bytes()?));
        }
        EventOutcome::Fetch(FetchOutcome::Passthrough(request)) => {
          println!("Not intercepted: {} {}", request.method, request.url);
        }
        other => return Err(eyre!("Unexpected fetch outcome: {:?}", other)),
      }
    }
    Command::Push { payload } => {
      worker.handle(Event::Push(payload)).await?;
    }
    Command::Click { action } => {
      worker.handle(Event::NotificationClick { action }).await?;
    }
    Command::Sync { tag } => {
      let tag = tag.unwrap_or_else(|| worker.config().sync_tag.clone());
      match worker.handle(Event::Sync { tag }).await? {
        EventOutcome::Sync(SyncReport::Drained { replayed, retained }) => {
          println!("Replayed {} submission(s), {} still queued", replayed, retained);
        }
        EventOutcome::Sync(SyncReport::Ignored) => println!("Sync tag ignored"),
        EventOutcome::Sync(SyncReport::QueueUnavailable) => {
          println!("Submission queue unavailable; see log")
        }
        other => return Err(eyre!("Unexpected sync outcome: {:?}", other)),
      }
    }
    Command::Message { json } => {
      let message = ControlMessage::from_json(&json)?;
      match worker.handle(Event::Message(message)).await? {
        EventOutcome::Lifecycle(state) => println!("{}: {}", worker.config().cache_name, state),
        _ => println!("Message handled"),
      }
    }
    Command::Enqueue {
      url,
      method,
      body,
      content_type,
    } => {
      let url = worker
        .config()
        .origin
        .join(&url)
        .map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?;
      let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;

      let mut request = Request::get(url)
        .with_method(method)
        .with_header("content-type", &content_type);
      if let Some(body) = body {
        request = request.with_body(body);
      }
      worker.defer_submission(&request)?;
      println!("Queued {} {}", request.method, request.url);
    }
    Command::Caches => {
      let storage = worker.storage();
      for name in storage.names()? {
        let marker = if name == worker.config().cache_name {
          " (current)"
        } else {
          ""
        };
        println!("{}{}", name, marker);
        for key in storage.keys(&name)? {
          println!("  {}", key);
        }
      }
    }
  }

  Ok(())
}

fn lifecycle(outcome: EventOutcome) -> Result<WorkerState> {
  match outcome {
    EventOutcome::Lifecycle(state) => Ok(state),
    other => Err(eyre!("Unexpected lifecycle outcome: {:?}", other)),
  }
}
