//! The interposition layer as seen by its host: install, activate, fetch.

mod generation;
mod strategy;

use color_eyre::Result;
use std::sync::Arc;
use url::Url;

use crate::cache::{CacheEvent, CacheLayer, CacheStorage, Resolved};
use crate::config::Config;
use crate::net::{Fetcher, Request};

pub use generation::{ActivateReport, GenerationManager, InstallReport};
pub use strategy::{classify, mirror_for, MirrorPair, Strategy};

/// What the host should do with a request.
#[derive(Debug)]
pub enum FetchOutcome {
  /// The worker answered the request
  Handled(Resolved),
  /// Not intercepted; the host sends it to the network unchanged
  Passthrough,
}

/// Lifecycle triggers for one cache generation.
pub struct Worker<S: CacheStorage, F: Fetcher> {
  generations: GenerationManager<S>,
  layer: CacheLayer<F>,
  mirrors: Vec<MirrorPair>,
  seed: Vec<Url>,
}

impl<S: CacheStorage, F: Fetcher> Worker<S, F> {
  pub fn new(config: &Config, storage: Arc<S>, fetcher: Arc<F>) -> Result<Self> {
    Ok(Self {
      generations: GenerationManager::new(storage, &config.generation)?,
      layer: CacheLayer::new(fetcher, config.mirrors.clone(), &config.default_document),
      mirrors: config.mirrors.clone(),
      seed: config.seed.clone(),
    })
  }

  pub fn generations(&self) -> &GenerationManager<S> {
    &self.generations
  }

  pub fn fetcher(&self) -> &F {
    self.layer.fetcher()
  }

  /// Seed the current generation's store.
  pub async fn on_install(&self) -> Result<InstallReport> {
    self.generations.install(self.fetcher(), &self.seed).await
  }

  /// Drop stale generations and take over all future requests.
  pub async fn on_activate(&self) -> Result<ActivateReport> {
    self.generations.activate()
  }

  /// Route one request.
  ///
  /// Intercepted requests always produce a response, whatever fails along
  /// the way.
  pub async fn on_fetch(&self, request: &Request) -> FetchOutcome {
    let passthrough = || {
      CacheEvent::Passthrough {
        method: request.method.as_str(),
        url: request.url.as_str(),
      }
      .emit();
      FetchOutcome::Passthrough
    };

    let Some(store) = self.generations.serving_store() else {
      return passthrough();
    };

    let resolved = match classify(request, &self.mirrors) {
      Strategy::Passthrough => return passthrough(),
      Strategy::CacheFirst => self.layer.cache_first(&store, request).await,
      Strategy::NetworkFirst => self.layer.network_first(&store, request).await,
    };

    FetchOutcome::Handled(resolved)
  }
}
