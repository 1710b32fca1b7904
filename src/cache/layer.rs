//! Cache layer that orchestrates caching logic with network fetching.

use std::sync::Arc;
use url::Url;

use super::events::CacheEvent;
use super::storage::{CacheStorage, CacheStore};
use super::traits::{RequestKey, Resolved, ResponseSnapshot, ResponseSource};
use crate::net::{Fetcher, Request};
use crate::worker::{mirror_for, MirrorPair};

/// Body of the synthesized response when a CDN resource cannot be loaded.
pub const NETWORK_ERROR_BODY: &str = "Network error, unable to load resource";
/// Body of the synthesized response when the app is offline with nothing cached.
pub const OFFLINE_BODY: &str = "Offline, unable to load resource";

/// Cache layer that resolves requests against a store and the network.
///
/// Every method answers with a response; failures only move the request
/// further down its fallback chain.
pub struct CacheLayer<F: Fetcher> {
  fetcher: Arc<F>,
  mirrors: Vec<MirrorPair>,
  /// Key served when both the network and the exact lookup fail
  default_document: RequestKey,
}

impl<F: Fetcher> CacheLayer<F> {
  pub fn new(fetcher: Arc<F>, mirrors: Vec<MirrorPair>, default_document: &Url) -> Self {
    Self {
      fetcher,
      mirrors,
      default_document: RequestKey::get(default_document),
    }
  }

  pub fn fetcher(&self) -> &F {
    &self.fetcher
  }

  /// Resolve with cache-first strategy.
  ///
  /// 1. Check cache - on hit, return without touching the network
  /// 2. Fetch from network, store if cacheable
  /// 3. On transport failure, retry once through the alternate mirror and
  ///    store the result under the original key
  /// 4. Otherwise answer 503
  pub async fn cache_first<S: CacheStorage>(
    &self,
    store: &CacheStore<S>,
    request: &Request,
  ) -> Resolved {
    let key = RequestKey::from(request);
    let url = request.url.as_str();

    if let Some(cached) = self.lookup(store, &key) {
      CacheEvent::Hit { url }.emit();
      return Resolved::new(cached, ResponseSource::Cache);
    }
    CacheEvent::Miss { url }.emit();

    let error = match self.fetcher.fetch(request).await {
      Ok(response) => {
        store_if_cacheable(store, &key, &response);
        return Resolved::new(response, ResponseSource::Network);
      }
      Err(error) => error,
    };
    CacheEvent::NetworkFailed { url, error: &error }.emit();

    if let Some(mirror) = mirror_for(&request.url, &self.mirrors) {
      CacheEvent::Mirror {
        url,
        mirror: mirror.as_str(),
      }
      .emit();

      match self.fetcher.fetch(&request.with_url(mirror.clone())).await {
        Ok(response) => {
          store_if_cacheable(store, &key, &response);
          return Resolved::new(response, ResponseSource::Mirror);
        }
        Err(error) => {
          CacheEvent::NetworkFailed {
            url: mirror.as_str(),
            error: &error,
          }
          .emit();
        }
      }
    }

    CacheEvent::Exhausted { url }.emit();
    Resolved::new(
      ResponseSnapshot::unavailable(&request.url, NETWORK_ERROR_BODY),
      ResponseSource::Synthesized,
    )
  }

  /// Resolve with network-first strategy.
  ///
  /// 1. Fetch from network - any HTTP status counts as an answer, store if
  ///    cacheable
  /// 2. On transport failure, serve the exact cache entry
  /// 3. Then the default document
  /// 4. Otherwise answer 503
  pub async fn network_first<S: CacheStorage>(
    &self,
    store: &CacheStore<S>,
    request: &Request,
  ) -> Resolved {
    let key = RequestKey::from(request);
    let url = request.url.as_str();

    let error = match self.fetcher.fetch(request).await {
      Ok(response) => {
        store_if_cacheable(store, &key, &response);
        return Resolved::new(response, ResponseSource::Network);
      }
      Err(error) => error,
    };
    CacheEvent::NetworkFailed { url, error: &error }.emit();

    if let Some(cached) = self.lookup(store, &key) {
      CacheEvent::CacheFallback { url }.emit();
      return Resolved::new(cached, ResponseSource::CacheFallback);
    }
    CacheEvent::Miss { url }.emit();

    if let Some(document) = self.lookup(store, &self.default_document) {
      CacheEvent::DefaultDocument {
        url,
        document: &self.default_document.url,
      }
      .emit();
      return Resolved::new(document, ResponseSource::DefaultDocument);
    }

    CacheEvent::Exhausted { url }.emit();
    Resolved::new(
      ResponseSnapshot::unavailable(&request.url, OFFLINE_BODY),
      ResponseSource::Synthesized,
    )
  }

  /// Store lookup where any store failure counts as a miss.
  fn lookup<S: CacheStorage>(
    &self,
    store: &CacheStore<S>,
    key: &RequestKey,
  ) -> Option<ResponseSnapshot> {
    match store.get(key) {
      Ok(cached) => cached.map(|c| c.response),
      Err(error) => {
        CacheEvent::StoreError {
          url: &key.url,
          error: &error,
        }
        .emit();
        None
      }
    }
  }
}

/// Write `response` under `key` when it is cacheable. Store failures are
/// logged and reported as not stored.
pub fn store_if_cacheable<S: CacheStorage>(
  store: &CacheStore<S>,
  key: &RequestKey,
  response: &ResponseSnapshot,
) -> bool {
  if !response.is_cacheable() {
    CacheEvent::NotStored {
      url: &key.url,
      status: response.status,
      response_type: response.response_type.as_str(),
    }
    .emit();
    return false;
  }

  match store.put(key, response) {
    Ok(()) => {
      CacheEvent::Stored { url: &key.url }.emit();
      true
    }
    Err(error) => {
      CacheEvent::StoreError {
        url: &key.url,
        error: &error,
      }
      .emit();
      false
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{ResponseType, SqliteStorage};
  use crate::net::testing::ScriptedFetcher;

  const THREE: &str = "https://unpkg.com/three@0.128.0/build/three.min.js";
  const THREE_MIRROR: &str = "https://cdn.jsdelivr.net/npm/three@0.128.0/build/three.min.js";
  const ROOT: &str = "http://localhost:8000/";
  const PAGE: &str = "http://localhost:8000/about";

  struct Fixture {
    storage: Arc<SqliteStorage>,
    store: CacheStore<SqliteStorage>,
    fetcher: Arc<ScriptedFetcher>,
    layer: CacheLayer<ScriptedFetcher>,
  }

  fn fixture() -> Fixture {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let store = CacheStore::open(Arc::clone(&storage), "v1").unwrap();
    let fetcher = Arc::new(ScriptedFetcher::new());
    let mirrors =
      vec![MirrorPair::parse("https://unpkg.com/", "https://cdn.jsdelivr.net/npm/").unwrap()];
    let layer = CacheLayer::new(
      Arc::clone(&fetcher),
      mirrors,
      &Url::parse(ROOT).unwrap(),
    );
    Fixture {
      storage,
      store,
      fetcher,
      layer,
    }
  }

  fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  fn key(url: &str) -> RequestKey {
    RequestKey::get(&Url::parse(url).unwrap())
  }

  fn cached_body(f: &Fixture, url: &str) -> Option<String> {
    f.store
      .get(&key(url))
      .unwrap()
      .map(|c| String::from_utf8(c.response.body.to_vec()).unwrap())
  }

  #[tokio::test]
  async fn test_cache_first_miss_fetches_and_stores() {
    let f = fixture();
    f.fetcher.route(THREE, 200, ResponseType::Cors, "three");

    let resolved = f.layer.cache_first(&f.store, &get(THREE)).await;

    assert_eq!(resolved.source, ResponseSource::Network);
    assert_eq!(&resolved.response.body[..], b"three");
    assert_eq!(cached_body(&f, THREE).as_deref(), Some("three"));
  }

  #[tokio::test]
  async fn test_cache_first_hit_never_touches_network() {
    let f = fixture();
    f.fetcher.route(THREE, 200, ResponseType::Cors, "three");
    f.layer.cache_first(&f.store, &get(THREE)).await;

    for _ in 0..3 {
      let resolved = f.layer.cache_first(&f.store, &get(THREE)).await;
      assert_eq!(resolved.source, ResponseSource::Cache);
      assert_eq!(&resolved.response.body[..], b"three");
    }
    assert_eq!(f.fetcher.calls_to(THREE), 1);
  }

  #[tokio::test]
  async fn test_cache_first_does_not_store_opaque_or_errors() {
    let f = fixture();
    f.fetcher.route(THREE, 200, ResponseType::Opaque, "opaque");
    let resolved = f.layer.cache_first(&f.store, &get(THREE)).await;
    assert_eq!(&resolved.response.body[..], b"opaque");
    assert!(cached_body(&f, THREE).is_none());

    f.fetcher.route(THREE, 404, ResponseType::Cors, "missing");
    let resolved = f.layer.cache_first(&f.store, &get(THREE)).await;
    assert_eq!(resolved.response.status, 404);
    assert!(cached_body(&f, THREE).is_none());
  }

  #[tokio::test]
  async fn test_mirror_failover_stores_under_original_key() {
    let f = fixture();
    f.fetcher.route(THREE_MIRROR, 200, ResponseType::Cors, "three from mirror");

    let resolved = f.layer.cache_first(&f.store, &get(THREE)).await;
    assert_eq!(resolved.source, ResponseSource::Mirror);
    assert_eq!(&resolved.response.body[..], b"three from mirror");
    assert_eq!(f.fetcher.calls(), vec![THREE, THREE_MIRROR]);

    // Original still unreachable: served from the store, no network at all
    let resolved = f.layer.cache_first(&f.store, &get(THREE)).await;
    assert_eq!(resolved.source, ResponseSource::Cache);
    assert_eq!(&resolved.response.body[..], b"three from mirror");
    assert_eq!(f.fetcher.calls().len(), 2);

    assert!(cached_body(&f, THREE_MIRROR).is_none());
  }

  #[tokio::test]
  async fn test_mirror_answer_is_stored_only_when_cacheable() {
    let f = fixture();
    f.fetcher.route(THREE_MIRROR, 404, ResponseType::Cors, "not on mirror");

    let resolved = f.layer.cache_first(&f.store, &get(THREE)).await;
    assert_eq!(resolved.source, ResponseSource::Mirror);
    assert_eq!(resolved.response.status, 404);
    assert_eq!(&resolved.response.body[..], b"not on mirror");
    assert!(cached_body(&f, THREE).is_none());

    f.fetcher.route(THREE_MIRROR, 200, ResponseType::Opaque, "opaque");
    let resolved = f.layer.cache_first(&f.store, &get(THREE)).await;
    assert_eq!(resolved.source, ResponseSource::Mirror);
    assert_eq!(&resolved.response.body[..], b"opaque");
    assert!(cached_body(&f, THREE).is_none());

    // Mirror gone too: nothing was stored, so the request is exhausted
    f.fetcher.go_offline(THREE_MIRROR);
    let resolved = f.layer.cache_first(&f.store, &get(THREE)).await;
    assert_eq!(resolved.source, ResponseSource::Synthesized);
    assert_eq!(resolved.response.status, 503);
    assert_eq!(f.fetcher.calls_to(THREE), 3);
  }

  #[tokio::test]
  async fn test_cache_first_total_failure_is_503() {
    let f = fixture();

    let resolved = f.layer.cache_first(&f.store, &get(THREE)).await;
    assert_eq!(resolved.source, ResponseSource::Synthesized);
    assert_eq!(resolved.response.status, 503);
    assert_eq!(&resolved.response.body[..], NETWORK_ERROR_BODY.as_bytes());
    assert!(cached_body(&f, THREE).is_none());

    // Alternate side has no mirror of its own
    let resolved = f.layer.cache_first(&f.store, &get(THREE_MIRROR)).await;
    assert_eq!(resolved.response.status, 503);
    assert_eq!(f.fetcher.calls(), vec![THREE, THREE_MIRROR, THREE_MIRROR]);
  }

  #[tokio::test]
  async fn test_network_first_prefers_network_and_refreshes_store() {
    let f = fixture();
    f.fetcher.ok(PAGE, "v1 page");
    f.layer.network_first(&f.store, &get(PAGE)).await;

    f.fetcher.ok(PAGE, "v2 page");
    let resolved = f.layer.network_first(&f.store, &get(PAGE)).await;

    assert_eq!(resolved.source, ResponseSource::Network);
    assert_eq!(&resolved.response.body[..], b"v2 page");
    assert_eq!(cached_body(&f, PAGE).as_deref(), Some("v2 page"));
    assert_eq!(f.fetcher.calls_to(PAGE), 2);
  }

  #[tokio::test]
  async fn test_network_first_passes_error_status_through() {
    let f = fixture();
    f.fetcher.ok(PAGE, "cached page");
    f.layer.network_first(&f.store, &get(PAGE)).await;

    f.fetcher.route(PAGE, 500, ResponseType::Basic, "boom");
    let resolved = f.layer.network_first(&f.store, &get(PAGE)).await;

    assert_eq!(resolved.source, ResponseSource::Network);
    assert_eq!(resolved.response.status, 500);
    assert_eq!(cached_body(&f, PAGE).as_deref(), Some("cached page"));
  }

  #[tokio::test]
  async fn test_network_first_falls_back_to_cache() {
    let f = fixture();
    f.fetcher.ok(PAGE, "page");
    f.layer.network_first(&f.store, &get(PAGE)).await;
    f.fetcher.go_offline_everywhere();

    let resolved = f.layer.network_first(&f.store, &get(PAGE)).await;
    assert_eq!(resolved.source, ResponseSource::CacheFallback);
    assert_eq!(&resolved.response.body[..], b"page");
  }

  #[tokio::test]
  async fn test_network_first_offline_shell() {
    let f = fixture();
    f.store
      .put(
        &key(ROOT),
        &ResponseSnapshot {
          url: ROOT.to_string(),
          status: 200,
          status_text: "OK".to_string(),
          response_type: ResponseType::Basic,
          headers: Vec::new(),
          body: bytes::Bytes::from_static(b"<html>shell</html>"),
        },
      )
      .unwrap();

    let resolved = f.layer.network_first(&f.store, &get(PAGE)).await;
    assert_eq!(resolved.source, ResponseSource::DefaultDocument);
    assert_eq!(&resolved.response.body[..], b"<html>shell</html>");
    assert!(cached_body(&f, PAGE).is_none());
  }

  #[tokio::test]
  async fn test_network_first_total_failure_is_503() {
    let f = fixture();

    let resolved = f.layer.network_first(&f.store, &get(PAGE)).await;
    assert_eq!(resolved.source, ResponseSource::Synthesized);
    assert_eq!(resolved.response.status, 503);
    assert_eq!(
      resolved.response.header("content-type"),
      Some("text/plain; charset=utf-8")
    );
    assert!(!resolved.response.body.is_empty());
    assert_eq!(&resolved.response.body[..], OFFLINE_BODY.as_bytes());
    assert!(f.store.keys().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_deleted_store_behaves_like_a_miss() {
    let f = fixture();
    f.fetcher.route(THREE, 200, ResponseType::Cors, "three");
    f.layer.cache_first(&f.store, &get(THREE)).await;

    f.storage.delete_store("v1").unwrap();

    // Lookup misses, the fetch still answers and the failed write is ignored
    let resolved = f.layer.cache_first(&f.store, &get(THREE)).await;
    assert_eq!(resolved.source, ResponseSource::Network);
    assert_eq!(f.fetcher.calls_to(THREE), 2);

    f.fetcher.go_offline_everywhere();
    let resolved = f.layer.network_first(&f.store, &get(PAGE)).await;
    assert_eq!(resolved.response.status, 503);
  }
}
