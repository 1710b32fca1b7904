//! Generational response cache.
//!
//! This module provides the storage side of the interposition layer:
//! - Named stores, one per cache generation, holding request key → response
//! - Cache-first and network-first resolution with mirror and default-document
//!   fallbacks
//! - Structured events for every decision

mod events;
mod layer;
mod storage;
mod traits;

pub use events::CacheEvent;
pub use layer::CacheLayer;
pub use storage::{CacheStorage, CacheStore, CachedResponse, SqliteStorage};
pub use traits::{RequestKey, Resolved, ResponseSnapshot, ResponseSource, ResponseType};
