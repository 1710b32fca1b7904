//! Structured events for every cache decision.
//!
//! All lifecycle and routing decisions are reported through [`CacheEvent::emit`]
//! so that log output carries a stable `event` field instead of free text.

use color_eyre::Report;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub enum CacheEvent<'a> {
  /// Seeding of a generation started
  Installing { generation: &'a str, seeds: usize },
  /// A seed resource could not be stored
  SeedFailed { url: &'a str, error: &'a Report },
  /// Seeding finished
  Installed {
    generation: &'a str,
    seeded: usize,
    failed: usize,
  },
  /// A stale generation store was removed
  StoreRemoved { name: &'a str },
  /// A stale generation store could not be removed and was left behind
  StoreRemoveFailed { name: &'a str, error: &'a Report },
  /// A generation now serves all requests
  Activated { generation: &'a str, removed: usize },
  /// Store lookup found an entry
  Hit { url: &'a str },
  /// Store lookup found nothing
  Miss { url: &'a str },
  /// Response written to the store
  Stored { url: &'a str },
  /// Response not eligible for storage
  NotStored {
    url: &'a str,
    status: u16,
    response_type: &'a str,
  },
  /// Store read or write failed and was treated as a miss or a no-op
  StoreError { url: &'a str, error: &'a Report },
  /// Transport-level failure of a fetch
  NetworkFailed { url: &'a str, error: &'a Report },
  /// Retrying through the alternate mirror
  Mirror { url: &'a str, mirror: &'a str },
  /// Served the exact store entry after a network failure
  CacheFallback { url: &'a str },
  /// Served the application root after a network failure
  DefaultDocument { url: &'a str, document: &'a str },
  /// Every step failed, answering with a synthesized response
  Exhausted { url: &'a str },
  /// Request is not intercepted
  Passthrough { method: &'a str, url: &'a str },
}

impl CacheEvent<'_> {
  pub fn name(&self) -> &'static str {
    match self {
      Self::Installing { .. } => "installing",
      Self::SeedFailed { .. } => "seed_failed",
      Self::Installed { .. } => "installed",
      Self::StoreRemoved { .. } => "store_removed",
      Self::StoreRemoveFailed { .. } => "store_remove_failed",
      Self::Activated { .. } => "activated",
      Self::Hit { .. } => "hit",
      Self::Miss { .. } => "miss",
      Self::Stored { .. } => "stored",
      Self::NotStored { .. } => "not_stored",
      Self::StoreError { .. } => "store_error",
      Self::NetworkFailed { .. } => "network_failed",
      Self::Mirror { .. } => "mirror",
      Self::CacheFallback { .. } => "cache_fallback",
      Self::DefaultDocument { .. } => "default_document",
      Self::Exhausted { .. } => "exhausted",
      Self::Passthrough { .. } => "passthrough",
    }
  }

  pub fn emit(&self) {
    let event = self.name();
    match *self {
      Self::Installing { generation, seeds } => {
        info!(event, generation, seeds, "installing generation")
      }
      Self::SeedFailed { url, error } => {
        warn!(event, url, error = %error, "failed to seed resource")
      }
      Self::Installed {
        generation,
        seeded,
        failed,
      } => info!(event, generation, seeded, failed, "generation installed"),
      Self::StoreRemoved { name } => info!(event, store = name, "removed stale cache store"),
      Self::StoreRemoveFailed { name, error } => {
        warn!(event, store = name, error = %error, "failed to remove stale cache store")
      }
      Self::Activated {
        generation,
        removed,
      } => info!(event, generation, removed, "generation activated"),
      Self::Hit { url } => debug!(event, url, "served from cache"),
      Self::Miss { url } => debug!(event, url, "cache miss"),
      Self::Stored { url } => debug!(event, url, "response cached"),
      Self::NotStored {
        url,
        status,
        response_type,
      } => debug!(event, url, status, response_type, "response not cacheable"),
      Self::StoreError { url, error } => {
        warn!(event, url, error = %error, "cache store unavailable")
      }
      Self::NetworkFailed { url, error } => {
        warn!(event, url, error = %error, "network request failed")
      }
      Self::Mirror { url, mirror } => info!(event, url, mirror, "trying alternate mirror"),
      Self::CacheFallback { url } => info!(event, url, "network failed, served from cache"),
      Self::DefaultDocument { url, document } => {
        info!(event, url, document, "network failed, served default document")
      }
      Self::Exhausted { url } => warn!(event, url, "resource unavailable"),
      Self::Passthrough { method, url } => debug!(event, method, url, "not intercepted"),
    }
  }
}
