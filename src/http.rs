//! Request and response types flowing through the worker.
//!
//! A [`Response`] body can be read exactly once. Code that needs to both
//! store a response and hand it back must call [`Response::try_clone`]
//! before either side reads the body.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use url::Url;

/// Header map with lowercased names.
pub type Headers = BTreeMap<String, String>;

/// How the request was initiated by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level page navigation
  Navigate,
  /// Sub-resource loads: scripts, images, API calls
  Cors,
}

#[derive(Debug, Clone)]
pub struct Request {
  pub url: Url,
  pub method: Method,
  pub mode: RequestMode,
  pub headers: Headers,
  pub body: Option<Vec<u8>>,
}

impl Request {
  /// A plain GET for a sub-resource.
  pub fn get(url: Url) -> Self {
    Self {
      url,
      method: Method::GET,
      mode: RequestMode::Cors,
      headers: Headers::new(),
      body: None,
    }
  }

  /// A GET issued by a page navigation.
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.to_string());
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = Some(body.into());
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// Key under which this request is stored in a Named Cache.
  ///
  /// Fragments never reach the network, so they are not part of the key.
  pub fn cache_key(&self) -> String {
    let mut url = self.url.clone();
    url.set_fragment(None);
    hash_key(&format!("{} {}", self.method, url))
  }

  /// Identity of a deferred submission; identical replays collapse to one entry.
  pub fn submission_key(&self) -> String {
    let mut input = format!("{} {}", self.method, self.url).into_bytes();
    input.push(0);
    if let Some(body) = &self.body {
      input.extend_from_slice(body);
    }
    let result = Sha256::digest(&input);
    hex::encode(result)
  }
}

fn hash_key(input: &str) -> String {
  // SHA256 hash for stable, fixed-length keys
  let mut hasher = Sha256::new();
  hasher.update(input.as_bytes());
  let result = hasher.finalize();
  hex::encode(result)
}

/// A response whose body is a single-read stream.
#[derive(Debug)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Headers,
  body: Option<Vec<u8>>,
}

impl Response {
  pub fn new(status: u16, status_text: impl Into<String>, headers: Headers, body: Vec<u8>) -> Self {
    Self {
      status,
      status_text: status_text.into(),
      headers,
      body: Some(body),
    }
  }

  /// Synthetic response returned when neither network nor cache can serve.
  pub fn service_unavailable() -> Self {
    let mut headers = Headers::new();
    headers.insert(
      "content-type".to_string(),
      "text/plain; charset=utf-8".to_string(),
    );
    Self::new(
      503,
      "Service Unavailable",
      headers,
      b"Offline - content not available".to_vec(),
    )
  }

  /// 2xx status.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  #[cfg(test)]
  pub fn body_used(&self) -> bool {
    self.body.is_none()
  }

  /// Duplicate the response. Fails once the body has been read.
  pub fn try_clone(&self) -> Result<Self> {
    let body = self
      .body
      .clone()
      .ok_or_else(|| eyre!("Failed to clone response: body already used"))?;

    Ok(Self {
      status: self.status,
      status_text: self.status_text.clone(),
      headers: self.headers.clone(),
      body: Some(body),
    })
  }

  /// Read the body. A second read fails.
  pub fn bytes(&mut self) -> Result<Vec<u8>> {
    self
      .body
      .take()
      .ok_or_else(|| eyre!("Response body already used"))
  }

  #[cfg(test)]
  pub fn text(&mut self) -> Result<String> {
    let bytes = self.bytes()?;
    String::from_utf8(bytes).map_err(|e| eyre!("Response body is not UTF-8: {}", e))
  }

  /// Consume the response into a storable snapshot.
  pub fn into_cached(mut self, url: &Url) -> Result<CachedResponse> {
    let body = self.bytes()?;
    Ok(CachedResponse {
      url: url.to_string(),
      status: self.status,
      status_text: self.status_text,
      headers: self.headers,
      body,
    })
  }
}

/// Snapshot of a response as held in a Named Cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
  /// URL of the request this response answers
  pub url: String,
  pub status: u16,
  pub status_text: String,
  pub headers: Headers,
  pub body: Vec<u8>,
}

impl CachedResponse {
  /// Materialise a fresh, unread response from the snapshot.
  pub fn to_response(&self) -> Response {
    Response::new(
      self.status,
      self.status_text.clone(),
      self.headers.clone(),
      self.body.clone(),
    )
  }
}
