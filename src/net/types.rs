use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use url::Url;

/// An outgoing request as seen by the interposition layer.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Option<Bytes>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// Same request aimed at a different URL.
  pub fn with_url(&self, url: Url) -> Self {
    Self {
      url,
      ..self.clone()
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
    self.body = Some(body.into());
    self
  }
}

/// Parse a `Name: value` header line.
pub fn parse_header(line: &str) -> Result<(String, String)> {
  let (name, value) = line
    .split_once(':')
    .ok_or_else(|| eyre!("Invalid header '{}', expected 'Name: value'", line))?;
  let name = name.trim();
  if name.is_empty() {
    return Err(eyre!("Invalid header '{}', empty name", line));
  }
  Ok((name.to_string(), value.trim().to_string()))
}
