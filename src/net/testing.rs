//! In-memory fetcher for exercising cache strategies without a network.

use async_trait::async_trait;
use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::cache::{ResponseSnapshot, ResponseType};

use super::client::Fetcher;
use super::types::Request;

/// Answers from a fixed table of URLs. Unknown URLs fail like an offline host.
#[derive(Default)]
pub struct ScriptedFetcher {
  routes: Mutex<HashMap<String, ResponseSnapshot>>,
  calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  /// Serve `body` with `status` and `response_type` at `url`.
  pub fn route(&self, url: &str, status: u16, response_type: ResponseType, body: &str) {
    let response = ResponseSnapshot {
      url: url.to_string(),
      status,
      status_text: String::new(),
      response_type,
      headers: Vec::new(),
      body: Bytes::copy_from_slice(body.as_bytes()),
    };
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), response);
  }

  pub fn ok(&self, url: &str, body: &str) {
    self.route(url, 200, ResponseType::Basic, body);
  }

  /// Make `url` unreachable again.
  pub fn go_offline(&self, url: &str) {
    self.routes.lock().unwrap().remove(url);
  }

  pub fn go_offline_everywhere(&self) {
    self.routes.lock().unwrap().clear();
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  pub fn calls_to(&self, url: &str) -> usize {
    self.calls.lock().unwrap().iter().filter(|c| *c == url).count()
  }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
  async fn fetch(&self, request: &Request) -> Result<ResponseSnapshot> {
    let url = request.url.to_string();
    self.calls.lock().unwrap().push(url.clone());
    self
      .routes
      .lock()
      .unwrap()
      .get(&url)
      .cloned()
      .ok_or_else(|| eyre!("connection refused: {}", url))
  }
}
