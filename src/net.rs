//! Network access for the worker.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::http::{Headers, Request, Response};

/// Outbound network.
///
/// `Err` means the fetch itself failed (no connection, DNS, reset). Any HTTP
/// status, including errors, is an `Ok` response.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: Request) -> Result<Response>;
}

/// Network backed by a reqwest client.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("offline-worker/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: Request) -> Result<Response> {
    let url = request.url.clone();
    let mut builder = self
      .client
      .request(request.method, request.url)
      .headers(to_header_map(&request.headers)?);
    if let Some(body) = request.body {
      builder = builder.body(body);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;

    let status = response.status();
    let headers = from_header_map(response.headers());

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", url, e))?;

    Ok(Response::new(
      status.as_u16(),
      status.canonical_reason().unwrap_or_default(),
      headers,
      body.to_vec(),
    ))
  }
}

fn to_header_map(headers: &Headers) -> Result<HeaderMap> {
  let mut map = HeaderMap::new();
  for (name, value) in headers {
    let name = HeaderName::from_bytes(name.as_bytes())
      .map_err(|e| eyre!("Invalid header name '{}': {}", name, e))?;
    let value =
      HeaderValue::from_str(value).map_err(|e| eyre!("Invalid header value for {}: {}", name, e))?;
    map.insert(name, value);
  }
  Ok(map)
}

/// Repeated headers are joined with ", ". Values that are not visible ASCII
/// are dropped.
fn from_header_map(map: &HeaderMap) -> Headers {
  let mut headers = Headers::new();
  for (name, value) in map {
    let Ok(value) = value.to_str() else {
      continue;
    };
    headers
      .entry(name.as_str().to_string())
      .and_modify(|existing: &mut String| {
        existing.push_str(", ");
        existing.push_str(value);
      })
      .or_insert_with(|| value.to_string());
  }
  headers
}

/// Network that is never reachable.
pub struct OfflineNetwork;

#[async_trait]
impl Network for OfflineNetwork {
  async fn fetch(&self, request: Request) -> Result<Response> {
    Err(eyre!("Failed to fetch {}: network unavailable", request.url))
  }
}
