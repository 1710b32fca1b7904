use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::ACCESS_CONTROL_ALLOW_ORIGIN;
use std::time::Duration;
use url::{Origin, Url};

use crate::cache::{ResponseSnapshot, ResponseType};
use crate::config::Config;

use super::types::Request;

/// The fetch primitive the cache sits in front of.
///
/// `Err` always means a transport failure (unreachable host, DNS, timeout).
/// Any HTTP status, including 4xx and 5xx, is a successful fetch.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<ResponseSnapshot>;
}

/// HTTP fetcher backed by reqwest.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  /// Origin of the application, decides basic vs cross-origin responses
  origin: Origin,
}

impl HttpFetcher {
  pub fn new(origin: &Url, timeout: Option<Duration>) -> Result<Self> {
    let mut builder =
      reqwest::Client::builder().user_agent(concat!("cachegate/", env!("CARGO_PKG_VERSION")));
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }

    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      origin: origin.origin(),
    })
  }

  pub fn from_config(config: &Config) -> Result<Self> {
    Self::new(&config.origin, config.fetch_timeout())
  }

  fn response_type(&self, url: &Url, headers: &reqwest::header::HeaderMap) -> ResponseType {
    if url.origin() == self.origin {
      ResponseType::Basic
    } else if headers.contains_key(ACCESS_CONTROL_ALLOW_ORIGIN) {
      ResponseType::Cors
    } else {
      ResponseType::Opaque
    }
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<ResponseSnapshot> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status();
    let url = response.url().clone();
    let response_type = self.response_type(&url, response.headers());
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", url, e))?;

    Ok(ResponseSnapshot {
      url: url.to_string(),
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      response_type,
      headers,
      body,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use wiremock::matchers::{body_string, header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn request(server: &MockServer, p: &str) -> Request {
    Request::get(Url::parse(&format!("{}{}", server.uri(), p)).unwrap())
  }

  #[tokio::test]
  async fn test_same_origin_response_is_basic() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/index.html"))
      .respond_with(ResponseTemplate::new(200).set_body_raw("<html></html>", "text/html"))
      .mount(&server)
      .await;

    let origin = Url::parse(&server.uri()).unwrap();
    let fetcher = HttpFetcher::new(&origin, None).unwrap();
    let response = fetcher.fetch(&request(&server, "/index.html")).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.status_text, "OK");
    assert_eq!(response.response_type, ResponseType::Basic);
    assert_eq!(response.header("content-type"), Some("text/html"));
    assert_eq!(&response.body[..], b"<html></html>");
  }

  #[tokio::test]
  async fn test_cross_origin_with_cors_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/three.min.js"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_string("var THREE;")
          .insert_header("access-control-allow-origin", "*"),
      )
      .mount(&server)
      .await;

    let origin = Url::parse("https://app.test/").unwrap();
    let fetcher = HttpFetcher::new(&origin, None).unwrap();
    let response = fetcher
      .fetch(&request(&server, "/three.min.js"))
      .await
      .unwrap();

    assert_eq!(response.response_type, ResponseType::Cors);
    assert!(response.is_cacheable());
  }

  #[tokio::test]
  async fn test_cross_origin_without_cors_header_is_opaque() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(200).set_body_string("secret"))
      .mount(&server)
      .await;

    let origin = Url::parse("https://app.test/").unwrap();
    let fetcher = HttpFetcher::new(&origin, None).unwrap();
    let response = fetcher.fetch(&request(&server, "/x")).await.unwrap();

    assert_eq!(response.response_type, ResponseType::Opaque);
    assert!(!response.is_cacheable());
  }

  #[tokio::test]
  async fn test_error_status_is_not_a_transport_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(404))
      .mount(&server)
      .await;

    let origin = Url::parse(&server.uri()).unwrap();
    let fetcher = HttpFetcher::new(&origin, None).unwrap();
    let response = fetcher.fetch(&request(&server, "/missing")).await.unwrap();

    assert_eq!(response.status, 404);
    assert_eq!(response.status_text, "Not Found");
  }

  #[tokio::test]
  async fn test_sends_method_headers_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/save"))
      .and(header("x-token", "abc"))
      .and(body_string("payload"))
      .respond_with(ResponseTemplate::new(201))
      .expect(1)
      .mount(&server)
      .await;

    let origin = Url::parse(&server.uri()).unwrap();
    let fetcher = HttpFetcher::new(&origin, None).unwrap();
    let request = Request::new(
      reqwest::Method::POST,
      Url::parse(&format!("{}/api/save", server.uri())).unwrap(),
    )
    .with_header("x-token", "abc")
    .with_body("payload");

    let response = fetcher.fetch(&request).await.unwrap();
    assert_eq!(response.status, 201);
  }

  #[tokio::test]
  async fn test_unreachable_host_is_error() {
    let origin = Url::parse("https://app.test/").unwrap();
    let fetcher = HttpFetcher::new(&origin, Some(Duration::from_secs(5))).unwrap();
    let request = Request::get(Url::parse("http://127.0.0.1:1/").unwrap());

    assert!(fetcher.fetch(&request).await.is_err());
  }

  #[tokio::test]
  async fn test_timeout_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
      .mount(&server)
      .await;

    let origin = Url::parse(&server.uri()).unwrap();
    let fetcher = HttpFetcher::new(&origin, Some(Duration::from_millis(100))).unwrap();

    assert!(fetcher.fetch(&request(&server, "/slow")).await.is_err());
  }
}
