//! Test doubles for driving a worker without a network or a browser.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

use super::{Host, Notification, Worker, WorkerStorage};
use crate::cache::{
  CacheStorage, LifecycleStore, PendingSubmission, SqliteStorage, SubmissionQueue, VersionRecord,
};
use crate::config::{Config, WorkerConfig};
use crate::http::{CachedResponse, Headers, Request, Response};
use crate::net::Network;

pub const TEST_CONFIG: &str = r#"
origin: https://tutor.example.com
cache_prefix: tutor
cache_version: v2
precache:
  - /
  - /offline.html
  - /static/app.js
"#;

#[derive(Clone)]
enum Reply {
  Respond { status: u16, body: String },
  Fail,
}

/// Scripted network. Unknown URLs fail like a dropped connection.
#[derive(Default)]
pub struct StubNetwork {
  replies: Mutex<HashMap<String, Reply>>,
  requests: Mutex<Vec<Request>>,
}

impl StubNetwork {
  pub fn respond(&self, url: &Url, status: u16, body: &str) {
    self.replies.lock().unwrap().insert(
      url.to_string(),
      Reply::Respond {
        status,
        body: body.to_string(),
      },
    );
  }

  pub fn fail(&self, url: &Url) {
    self.replies.lock().unwrap().insert(url.to_string(), Reply::Fail);
  }

  /// Drop every scripted reply.
  pub fn go_offline(&self) {
    self.replies.lock().unwrap().clear();
  }

  /// Serve every precache URL with a body naming its path.
  pub fn serve_precache(&self, config: &WorkerConfig) {
    for url in &config.precache {
      self.respond(url, 200, &format!("precached {}", url.path()));
    }
  }

  pub fn requests(&self) -> Vec<Request> {
    self.requests.lock().unwrap().clone()
  }
}

#[async_trait]
impl Network for StubNetwork {
  async fn fetch(&self, request: Request) -> Result<Response> {
    self.requests.lock().unwrap().push(request.clone());
    let reply = self.replies.lock().unwrap().get(request.url.as_str()).cloned();

    match reply {
      Some(Reply::Respond { status, body }) => {
        let mut headers = Headers::new();
        headers.insert("content-type".to_string(), "text/plain".to_string());
        headers.insert("x-served-by".to_string(), "stub".to_string());
        Ok(Response::new(status, "", headers, body.into_bytes()))
      }
      Some(Reply::Fail) | None => Err(eyre!("Failed to fetch {}: connection refused", request.url)),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
  SkipWaiting,
  ClaimClients,
  ShowNotification(Notification),
  CloseNotification,
  OpenWindow(Url),
}

/// Host that records every call.
#[derive(Default)]
pub struct RecordingHost {
  calls: Mutex<Vec<HostCall>>,
}

impl RecordingHost {
  pub fn calls(&self) -> Vec<HostCall> {
    self.calls.lock().unwrap().clone()
  }

  fn record(&self, call: HostCall) {
    self.calls.lock().unwrap().push(call);
  }
}

#[async_trait]
impl Host for RecordingHost {
  async fn skip_waiting(&self) {
    self.record(HostCall::SkipWaiting);
  }

  async fn claim_clients(&self) -> Result<()> {
    self.record(HostCall::ClaimClients);
    Ok(())
  }

  async fn show_notification(&self, notification: Notification) -> Result<()> {
    self.record(HostCall::ShowNotification(notification));
    Ok(())
  }

  async fn close_notification(&self) {
    self.record(HostCall::CloseNotification);
  }

  async fn open_window(&self, url: Url) -> Result<()> {
    self.record(HostCall::OpenWindow(url));
    Ok(())
  }
}

/// In-memory storage whose reads or writes can be made to fail.
pub struct FaultyStorage {
  inner: SqliteStorage,
  fail_writes: AtomicBool,
  fail_queue: AtomicBool,
}

impl FaultyStorage {
  pub fn new() -> Self {
    Self {
      inner: SqliteStorage::open_in_memory().unwrap(),
      fail_writes: AtomicBool::new(false),
      fail_queue: AtomicBool::new(false),
    }
  }

  /// Every later `put` fails.
  pub fn fail_writes(&self) {
    self.fail_writes.store(true, Ordering::SeqCst);
  }

  /// Reading the submission queue fails.
  pub fn fail_queue(&self) {
    self.fail_queue.store(true, Ordering::SeqCst);
  }
}

impl CacheStorage for FaultyStorage {
  fn open_cache(&self, cache_name: &str) -> Result<()> {
    self.inner.open_cache(cache_name)
  }

  fn names(&self) -> Result<Vec<String>> {
    self.inner.names()
  }

  fn delete_cache(&self, cache_name: &str) -> Result<bool> {
    self.inner.delete_cache(cache_name)
  }

  fn put(&self, cache_name: &str, request: &Request, response: &CachedResponse) -> Result<()> {
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(eyre!("Failed to store cache entry for {}: disk full", request.url));
    }
    self.inner.put(cache_name, request, response)
  }

  fn put_all(&self, cache_name: &str, entries: &[(Request, CachedResponse)]) -> Result<()> {
    self.inner.put_all(cache_name, entries)
  }

  fn lookup(&self, cache_name: &str, request: &Request) -> Result<Option<CachedResponse>> {
    self.inner.lookup(cache_name, request)
  }

  fn keys(&self, cache_name: &str) -> Result<Vec<String>> {
    self.inner.keys(cache_name)
  }
}

impl SubmissionQueue for FaultyStorage {
  fn enqueue(&self, queue: &str, request: &Request) -> Result<()> {
    self.inner.enqueue(queue, request)
  }

  fn pending(&self, queue: &str) -> Result<Vec<PendingSubmission>> {
    if self.fail_queue.load(Ordering::SeqCst) {
      return Err(eyre!("Failed to read queue {}: database is locked", queue));
    }
    self.inner.pending(queue)
  }

  fn remove(&self, queue: &str, id: i64) -> Result<()> {
    self.inner.remove(queue, id)
  }
}

impl LifecycleStore for FaultyStorage {
  fn load_version(&self, version: &str) -> Result<Option<VersionRecord>> {
    self.inner.load_version(version)
  }

  fn save_version(&self, version: &str, record: VersionRecord) -> Result<()> {
    self.inner.save_version(version, record)
  }

  fn forget_other_versions(&self, keep: &str) -> Result<()> {
    self.inner.forget_other_versions(keep)
  }

  fn active_version(&self) -> Result<Option<String>> {
    self.inner.active_version()
  }

  fn versions(&self) -> Result<Vec<(String, VersionRecord)>> {
    self.inner.versions()
  }
}

pub struct Fixture<S = SqliteStorage> {
  pub config: Arc<WorkerConfig>,
  pub storage: Arc<S>,
  pub network: Arc<StubNetwork>,
  pub host: Arc<RecordingHost>,
  pub worker: Worker<S, StubNetwork, RecordingHost>,
}

impl Fixture {
  pub fn new() -> Self {
    Self::with_config(TEST_CONFIG)
  }

  pub fn with_config(yaml: &str) -> Self {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    Self::with_storage(test_config(yaml), storage)
  }

  /// Installed and activated, with the precache set served once.
  pub async fn activated() -> Self {
    Self::new().activate_precached().await
  }
}

impl Fixture<FaultyStorage> {
  /// Activated worker over storage that fails on demand.
  pub async fn faulty() -> Self {
    Self::with_storage(test_config(TEST_CONFIG), Arc::new(FaultyStorage::new()))
      .activate_precached()
      .await
  }
}

fn test_config(yaml: &str) -> Arc<WorkerConfig> {
  Arc::new(Config::from_yaml(yaml).unwrap().worker_config().unwrap())
}

impl<S: WorkerStorage> Fixture<S> {
  /// A second worker sharing this fixture's storage (a new version upgrade).
  pub fn with_storage(config: Arc<WorkerConfig>, storage: Arc<S>) -> Self {
    let network = Arc::new(StubNetwork::default());
    let host = Arc::new(RecordingHost::default());
    let worker = Worker::new(
      Arc::clone(&config),
      Arc::clone(&storage),
      Arc::clone(&network),
      Arc::clone(&host),
    );

    Self {
      config,
      storage,
      network,
      host,
      worker,
    }
  }

  async fn activate_precached(self) -> Self {
    self.network.serve_precache(&self.config);
    self.worker.install().await.unwrap();
    self.worker.activate().await.unwrap();
    self
  }

  pub fn url(&self, path: &str) -> Url {
    self.config.origin.join(path).unwrap()
  }

  pub fn cached_body(&self, path: &str) -> Option<String> {
    self
      .storage
      .lookup(&self.config.cache_name, &Request::get(self.url(path)))
      .unwrap()
      .map(|cached| String::from_utf8(cached.body).unwrap())
  }
}
