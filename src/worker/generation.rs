//! Cache generation lifecycle: install, activate, and the readiness gate.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::warn;
use url::Url;

use crate::cache::{CacheEvent, CacheStorage, CacheStore, RequestKey};
use crate::net::{Fetcher, Request};

/// Outcome of seeding a generation.
#[derive(Debug, Clone, Default)]
pub struct InstallReport {
  pub seeded: Vec<Url>,
  pub failed: Vec<Url>,
}

/// Outcome of activating a generation.
#[derive(Debug, Clone, Default)]
pub struct ActivateReport {
  /// Stale stores that were deleted
  pub removed: Vec<String>,
  /// Stale stores that could not be deleted
  pub failed: Vec<String>,
}

/// Owns the current generation and decides which store serves requests.
pub struct GenerationManager<S: CacheStorage> {
  storage: Arc<S>,
  generation: String,
  /// Last known active generation
  active: RwLock<Option<String>>,
}

impl<S: CacheStorage> GenerationManager<S> {
  pub fn new(storage: Arc<S>, generation: &str) -> Result<Self> {
    let active = storage.active_generation()?;
    Ok(Self {
      storage,
      generation: generation.to_string(),
      active: RwLock::new(active),
    })
  }

  pub fn generation(&self) -> &str {
    &self.generation
  }

  /// Whether this generation currently serves requests.
  ///
  /// Re-reads the shared state so that a newer generation activated elsewhere
  /// takes over immediately. If the read fails the last known state is used.
  pub fn is_active(&self) -> bool {
    let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
    match self.storage.active_generation() {
      Ok(current) => *active = current,
      Err(error) => warn!(
        generation = %self.generation,
        error = %error,
        "failed to read active generation"
      ),
    }
    active.as_deref() == Some(self.generation.as_str())
  }

  /// Store that serves requests, or `None` until this generation is active.
  pub fn serving_store(&self) -> Option<CacheStore<S>> {
    self
      .is_active()
      .then(|| CacheStore::attach(Arc::clone(&self.storage), &self.generation))
  }

  /// Open this generation's store and seed it.
  ///
  /// Seeds are fetched concurrently. A seed that fails to fetch or is not
  /// cacheable is reported and skipped; the others are still stored.
  pub async fn install<F: Fetcher>(&self, fetcher: &F, seeds: &[Url]) -> Result<InstallReport> {
    let store = CacheStore::open(Arc::clone(&self.storage), &self.generation)?;
    CacheEvent::Installing {
      generation: &self.generation,
      seeds: seeds.len(),
    }
    .emit();

    let fetches = seeds.iter().map(|url| async move {
      let result = fetcher.fetch(&Request::get(url.clone())).await;
      (url, result)
    });

    let mut report = InstallReport::default();
    for (url, result) in join_all(fetches).await {
      let stored = result
        .and_then(|response| {
          if response.is_cacheable() {
            Ok(response)
          } else {
            Err(eyre!(
              "{} response with status {}",
              response.response_type.as_str(),
              response.status
            ))
          }
        })
        .and_then(|response| store.put(&RequestKey::get(url), &response));

      match stored {
        Ok(()) => report.seeded.push(url.clone()),
        Err(error) => {
          CacheEvent::SeedFailed {
            url: url.as_str(),
            error: &error,
          }
          .emit();
          report.failed.push(url.clone());
        }
      }
    }

    CacheEvent::Installed {
      generation: &self.generation,
      seeded: report.seeded.len(),
      failed: report.failed.len(),
    }
    .emit();

    Ok(report)
  }

  /// Delete every other generation's store and start serving from this one.
  ///
  /// A stale store that cannot be deleted is reported and left behind; it
  /// never keeps this generation from taking over. Requests already resolving
  /// against a deleted store keep going and see misses from then on.
  pub fn activate(&self) -> Result<ActivateReport> {
    let mut report = ActivateReport::default();

    let names = self.storage.store_names().unwrap_or_else(|error| {
      warn!(
        generation = %self.generation,
        error = %error,
        "failed to list cache stores"
      );
      Vec::new()
    });

    for name in names {
      if name == self.generation {
        continue;
      }
      match self.storage.delete_store(&name) {
        Ok(true) => {
          CacheEvent::StoreRemoved { name: &name }.emit();
          report.removed.push(name);
        }
        Ok(false) => {}
        Err(error) => {
          CacheEvent::StoreRemoveFailed {
            name: &name,
            error: &error,
          }
          .emit();
          report.failed.push(name);
        }
      }
    }

    self.storage.open_store(&self.generation)?;
    self.storage.set_active_generation(&self.generation)?;
    *self
      .active
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))? = Some(self.generation.clone());

    CacheEvent::Activated {
      generation: &self.generation,
      removed: report.removed.len(),
    }
    .emit();

    Ok(report)
  }
}
