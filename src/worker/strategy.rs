//! Request classification and mirror substitution.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use url::Url;

use crate::net::Request;

/// How a request is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Not intercepted at all
  Passthrough,
  /// Store first, then network, then alternate mirror
  CacheFirst,
  /// Network first, then store, then default document
  NetworkFirst,
}

/// Two base URLs known to serve identical content under the same relative path.
///
/// Both bases always end with `/`, so everything after the base (path and
/// query) can be carried over unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorPair {
  pub primary: Url,
  pub alternate: Url,
}

impl MirrorPair {
  pub fn parse(primary: &str, alternate: &str) -> Result<Self> {
    Ok(Self {
      primary: parse_base(primary)?,
      alternate: parse_base(alternate)?,
    })
  }

  /// Whether `url` is hosted on either side of the pair.
  pub fn is_trusted(&self, url: &Url) -> bool {
    let origin = url.origin();
    origin == self.primary.origin() || origin == self.alternate.origin()
  }

  /// Rewrite a primary URL onto the alternate base.
  pub fn substitute(&self, url: &Url) -> Option<Url> {
    let rest = url.as_str().strip_prefix(self.primary.as_str())?;
    let mut alternate = Url::parse(&format!("{}{}", self.alternate, rest)).ok()?;
    alternate.set_fragment(None);
    Some(alternate)
  }
}

fn parse_base(s: &str) -> Result<Url> {
  let mut url = Url::parse(s).map_err(|e| eyre!("Invalid mirror URL '{}': {}", s, e))?;
  if !matches!(url.scheme(), "http" | "https") || url.host().is_none() {
    return Err(eyre!("Mirror must be an http(s) URL with a host: {}", s));
  }
  if url.query().is_some() || url.fragment().is_some() {
    return Err(eyre!("Mirror must not carry a query or fragment: {}", s));
  }
  if !url.path().ends_with('/') {
    let path = format!("{}/", url.path());
    url.set_path(&path);
  }
  Ok(url)
}

/// Decide how `request` is routed.
///
/// Only `GET` is intercepted. Requests to any trusted mirror origin are served
/// cache-first, everything else network-first.
pub fn classify(request: &Request, mirrors: &[MirrorPair]) -> Strategy {
  if request.method != Method::GET {
    return Strategy::Passthrough;
  }

  if mirrors.iter().any(|m| m.is_trusted(&request.url)) {
    Strategy::CacheFirst
  } else {
    Strategy::NetworkFirst
  }
}

/// Alternate URL to try when `url` cannot be fetched, if any.
pub fn mirror_for(url: &Url, mirrors: &[MirrorPair]) -> Option<Url> {
  mirrors.iter().find_map(|m| m.substitute(url))
}
