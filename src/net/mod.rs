//! Network side of the cache: request descriptors and the fetch primitive.

mod client;
#[cfg(test)]
pub mod testing;
mod types;

pub use client::{Fetcher, HttpFetcher};
pub use types::{parse_header, Request};
