//! Core types for the caching system.

use bytes::Bytes;
use reqwest::Method;
use sha2::{Digest, Sha256};
use url::Url;

use crate::net::Request;

/// Identifies a cached response inside a store.
///
/// Two requests share a key when they use the same method and the same URL,
/// ignoring any fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  pub method: String,
  pub url: String,
}

impl RequestKey {
  pub fn new(method: &Method, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method: method.as_str().to_uppercase(),
      url: url.into(),
    }
  }

  /// Key for a plain `GET` of `url`.
  pub fn get(url: &Url) -> Self {
    Self::new(&Method::GET, url)
  }

  /// Stable, fixed-length hash used as the storage key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl From<&Request> for RequestKey {
  fn from(request: &Request) -> Self {
    Self::new(&request.method, &request.url)
  }
}

impl std::fmt::Display for RequestKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// How much of a response the caller is allowed to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
  /// Same-origin response
  Basic,
  /// Cross-origin response the remote explicitly shared
  Cors,
  /// Cross-origin response whose status and body cannot be trusted
  Opaque,
  /// Network error surfaced as a response
  Error,
}

impl ResponseType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
      Self::Error => "error",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "basic" => Some(Self::Basic),
      "cors" => Some(Self::Cors),
      "opaque" => Some(Self::Opaque),
      "error" => Some(Self::Error),
      _ => None,
    }
  }
}

/// A complete, immutable HTTP response.
///
/// The body is reference counted, so cloning a snapshot yields an independent
/// readable copy without duplicating the bytes. A snapshot can therefore be
/// written to a store and returned to the caller at the same time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSnapshot {
  /// Final URL of the response
  pub url: String,
  pub status: u16,
  pub status_text: String,
  pub response_type: ResponseType,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
}

impl ResponseSnapshot {
  /// Synthesized `503 Service Unavailable` with a plain-text explanation.
  pub fn unavailable(url: &Url, message: &str) -> Self {
    Self {
      url: url.to_string(),
      status: 503,
      status_text: "Service Unavailable".to_string(),
      response_type: ResponseType::Basic,
      headers: vec![(
        "content-type".to_string(),
        "text/plain; charset=utf-8".to_string(),
      )],
      body: Bytes::copy_from_slice(message.as_bytes()),
    }
  }

  /// Whether this response may be written to a store.
  ///
  /// Only complete `200` responses that the caller can fully read qualify.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200 && matches!(self.response_type, ResponseType::Basic | ResponseType::Cors)
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// Result of routing a request, including where the response came from.
#[derive(Debug, Clone)]
pub struct Resolved {
  pub response: ResponseSnapshot,
  pub source: ResponseSource,
}

impl Resolved {
  pub fn new(response: ResponseSnapshot, source: ResponseSource) -> Self {
    Self { response, source }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Live response from the requested URL
  Network,
  /// Live response from the alternate mirror
  Mirror,
  /// Served from the store without touching the network
  Cache,
  /// Served from the store after the network failed
  CacheFallback,
  /// Network and exact lookup failed, served the application root
  DefaultDocument,
  /// Every step failed, built locally
  Synthesized,
}

impl ResponseSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Network => "network",
      Self::Mirror => "mirror",
      Self::Cache => "cache",
      Self::CacheFallback => "cache-fallback",
      Self::DefaultDocument => "default-document",
      Self::Synthesized => "synthesized",
    }
  }
}
