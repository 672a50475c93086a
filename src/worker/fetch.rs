//! Network-first fetch interception with cache fallback.

use color_eyre::Result;
use reqwest::Method;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Host, WaitUntil, Worker, WorkerStorage};
use crate::cache::WorkerState;
use crate::http::{Request, Response};
use crate::net::Network;

/// Where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  Network,
  Cache,
  /// The reserved offline document, served for a failed navigation
  OfflineDocument,
  /// Synthetic 503 placeholder
  Unavailable,
}

#[derive(Debug)]
pub enum FetchOutcome {
  /// Not intercepted; the host performs the request itself.
  Passthrough(Request),
  Respond {
    response: Response,
    source: ResponseSource,
  },
}

impl FetchOutcome {
  fn respond(response: Response, source: ResponseSource) -> Self {
    Self::Respond { response, source }
  }
}

impl<S, N, H> Worker<S, N, H>
where
  S: WorkerStorage,
  N: Network + 'static,
  H: Host + 'static,
{
  /// Only same-origin GETs are intercepted.
  pub fn intercepts(&self, request: &Request) -> bool {
    request.method == Method::GET && self.config.is_same_origin(&request.url)
  }

  /// Handle a fetch event.
  ///
  /// Successful (200) network responses are written through to the cache as
  /// deferred work on `wait`. When the network fails the cached copy is
  /// served, then the offline document for navigations, then a 503.
  pub async fn fetch(&self, request: Request, wait: &mut WaitUntil) -> Result<FetchOutcome> {
    if !self.intercepts(&request) {
      debug!(url = %request.url, method = %request.method, "Request out of scope");
      return Ok(FetchOutcome::Passthrough(request));
    }

    // Pages are only controlled once this version is active
    match self.state() {
      Ok(Some(WorkerState::Activated)) => {}
      Ok(_) => return Ok(FetchOutcome::Passthrough(request)),
      Err(e) => {
        warn!(url = %request.url, "Failed to read worker state: {}", e);
        return Ok(FetchOutcome::Passthrough(request));
      }
    }

    match self.network.fetch(request.clone()).await {
      Ok(response) => {
        if response.status == 200 {
          match response.try_clone() {
            Ok(copy) => self.write_through(request, copy, wait),
            Err(e) => warn!(url = %request.url, "Failed to copy response for caching: {}", e),
          }
        } else {
          debug!(url = %request.url, status = response.status, "Not caching response");
        }
        Ok(FetchOutcome::respond(response, ResponseSource::Network))
      }
      Err(e) => {
        debug!(url = %request.url, "Network failed, falling back to cache: {}", e);
        Ok(self.fallback(&request))
      }
    }
  }

  fn write_through(&self, request: Request, response: Response, wait: &mut WaitUntil) {
    let storage = Arc::clone(&self.storage);
    let cache_name = self.config.cache_name.clone();

    wait.push(async move {
      let result = response
        .into_cached(&request.url)
        .and_then(|cached| storage.put(&cache_name, &request, &cached));
      if let Err(e) = result {
        warn!(url = %request.url, "Failed to cache response: {}", e);
      }
    });
  }

  fn fallback(&self, request: &Request) -> FetchOutcome {
    if let Some(cached) = self.cached(request) {
      return FetchOutcome::respond(cached, ResponseSource::Cache);
    }

    if request.is_navigation() {
      let offline = Request::get(self.config.offline_document.clone());
      if let Some(document) = self.cached(&offline) {
        return FetchOutcome::respond(document, ResponseSource::OfflineDocument);
      }
      warn!(url = %self.config.offline_document, "Offline document missing from cache");
    }

    FetchOutcome::respond(Response::service_unavailable(), ResponseSource::Unavailable)
  }

  /// Cache lookup where a storage error counts as a miss.
  fn cached(&self, request: &Request) -> Option<Response> {
    match self.storage.lookup(&self.config.cache_name, request) {
      Ok(hit) => hit.map(|cached| cached.to_response()),
      Err(e) => {
        warn!(url = %request.url, "Cache lookup failed: {}", e);
        None
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::super::testing::*;
  use super::*;
  use crate::cache::CacheStorage;
  use url::Url;

  async fn fetch(fixture: &Fixture, request: Request) -> FetchOutcome {
    let mut wait = WaitUntil::new();
    let outcome = fixture.worker.fetch(request, &mut wait).await.unwrap();
    wait.settle().await;
    outcome
  }

  fn expect_response(outcome: FetchOutcome) -> (Response, ResponseSource) {
    match outcome {
      FetchOutcome::Respond { response, source } => (response, source),
      FetchOutcome::Passthrough(request) => panic!("expected a response for {}", request.url),
    }
  }

  #[tokio::test]
  async fn test_cross_origin_get_passes_through() {
    let fixture = Fixture::activated().await;
    let before = fixture.network.requests().len();

    let url = Url::parse("https://cdn.example.com/lib.js").unwrap();
    let outcome = fetch(&fixture, Request::get(url.clone())).await;

    match outcome {
      FetchOutcome::Passthrough(request) => assert_eq!(request.url, url),
      other => panic!("expected passthrough, got {:?}", other),
    }
    assert_eq!(fixture.network.requests().len(), before);
  }

  #[tokio::test]
  async fn test_same_origin_post_passes_through() {
    let fixture = Fixture::activated().await;
    let request = Request::get(fixture.url("/api/contact"))
      .with_method(Method::POST)
      .with_body("name=ada");

    let outcome = fetch(&fixture, request).await;
    match outcome {
      FetchOutcome::Passthrough(request) => {
        assert_eq!(request.body.as_deref(), Some(b"name=ada".as_slice()))
      }
      other => panic!("expected passthrough, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_uncontrolled_page_passes_through() {
    let fixture = Fixture::new();
    fixture.network.respond(&fixture.url("/"), 200, "home");

    let outcome = fetch(&fixture, Request::navigate(fixture.url("/"))).await;
    assert!(matches!(outcome, FetchOutcome::Passthrough(_)));
  }

  #[tokio::test]
  async fn test_network_success_is_cached() {
    let fixture = Fixture::activated().await;
    fixture.network.respond(&fixture.url("/courses"), 200, "course list");

    let (mut response, source) = expect_response(
      fetch(&fixture, Request::get(fixture.url("/courses"))).await,
    );
    assert_eq!(source, ResponseSource::Network);
    assert_eq!(response.text().unwrap(), "course list");
    assert_eq!(fixture.cached_body("/courses").as_deref(), Some("course list"));
  }

  #[tokio::test]
  async fn test_network_refresh_overwrites_cache() {
    let fixture = Fixture::activated().await;
    fixture.network.respond(&fixture.url("/"), 200, "fresh home");

    fetch(&fixture, Request::navigate(fixture.url("/"))).await;
    assert_eq!(fixture.cached_body("/").as_deref(), Some("fresh home"));
  }

  #[tokio::test]
  async fn test_offline_serves_cached_copy() {
    let fixture = Fixture::activated().await;
    fixture.network.respond(&fixture.url("/dashboard"), 200, "dashboard");
    fetch(&fixture, Request::get(fixture.url("/dashboard"))).await;
    let stored = fixture
      .storage
      .lookup(&fixture.config.cache_name, &Request::get(fixture.url("/dashboard")))
      .unwrap()
      .unwrap();

    fixture.network.go_offline();
    let (mut response, source) = expect_response(
      fetch(&fixture, Request::get(fixture.url("/dashboard"))).await,
    );

    assert_eq!(source, ResponseSource::Cache);
    assert_eq!(response.status, stored.status);
    assert_eq!(response.headers, stored.headers);
    assert_eq!(response.bytes().unwrap(), stored.body);
  }

  #[tokio::test]
  async fn test_offline_navigation_gets_offline_document() {
    let fixture = Fixture::activated().await;
    fixture.network.go_offline();

    let (mut response, source) = expect_response(
      fetch(&fixture, Request::navigate(fixture.url("/teacher/schedule"))).await,
    );

    assert_eq!(source, ResponseSource::OfflineDocument);
    assert_eq!(response.text().unwrap(), "precached /offline.html");
  }

  #[tokio::test]
  async fn test_offline_subresource_gets_503() {
    let fixture = Fixture::activated().await;
    fixture.network.go_offline();

    let (mut response, source) = expect_response(
      fetch(&fixture, Request::get(fixture.url("/images/hero.png"))).await,
    );

    assert_eq!(source, ResponseSource::Unavailable);
    assert_eq!(response.status, 503);
    assert!(response.headers["content-type"].starts_with("text/plain"));
    assert!(!response.text().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_missing_offline_document_falls_back_to_503() {
    let fixture = Fixture::activated().await;
    fixture
      .storage
      .delete_cache(&fixture.config.cache_name)
      .unwrap();
    fixture.network.go_offline();

    let (response, source) = expect_response(
      fetch(&fixture, Request::navigate(fixture.url("/about"))).await,
    );
    assert_eq!(source, ResponseSource::Unavailable);
    assert_eq!(response.status, 503);
  }

  #[tokio::test]
  async fn test_error_status_is_returned_but_not_cached() {
    let fixture = Fixture::activated().await;
    fixture.network.respond(&fixture.url("/api/stats"), 500, "boom");

    let mut wait = WaitUntil::new();
    let outcome = fixture
      .worker
      .fetch(Request::get(fixture.url("/api/stats")), &mut wait)
      .await
      .unwrap();
    assert!(wait.is_empty());

    let (mut response, source) = expect_response(outcome);
    assert_eq!(source, ResponseSource::Network);
    assert_eq!(response.status, 500);
    assert_eq!(response.text().unwrap(), "boom");
    assert!(fixture.cached_body("/api/stats").is_none());

    // Still not served from cache once offline
    fixture.network.go_offline();
    let (response, source) = expect_response(
      fetch(&fixture, Request::get(fixture.url("/api/stats"))).await,
    );
    assert_eq!(source, ResponseSource::Unavailable);
    assert_eq!(response.status, 503);
  }

  #[tokio::test]
  async fn test_cache_write_failure_still_responds() {
    let fixture = Fixture::faulty().await;
    fixture.storage.fail_writes();
    fixture.network.respond(&fixture.url("/courses"), 200, "course list");

    let mut wait = WaitUntil::new();
    let outcome = fixture
      .worker
      .fetch(Request::get(fixture.url("/courses")), &mut wait)
      .await
      .unwrap();
    assert_eq!(wait.len(), 1);
    wait.settle().await;

    let (mut response, source) = expect_response(outcome);
    assert_eq!(source, ResponseSource::Network);
    assert_eq!(response.status, 200);
    assert_eq!(response.text().unwrap(), "course list");
    assert!(fixture.cached_body("/courses").is_none());
  }

  #[tokio::test]
  async fn test_redirect_is_not_cached() {
    let fixture = Fixture::activated().await;
    fixture.network.respond(&fixture.url("/login"), 302, "");

    let (response, _) = expect_response(fetch(&fixture, Request::get(fixture.url("/login"))).await);
    assert_eq!(response.status, 302);
    assert!(fixture.cached_body("/login").is_none());
  }
}
