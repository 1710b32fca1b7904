use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::worker::MirrorPair;

const DEFAULT_GENERATION: &str = "lidianchi-cache-v1";
const DEFAULT_ORIGIN: &str = "http://localhost:8000/";
const DEFAULT_MIRRORS: &[(&str, &str)] =
  &[("https://unpkg.com/", "https://cdn.jsdelivr.net/npm/")];

/// Configuration as written in the YAML file. Every field has a compiled-in
/// default, so an empty file (or no file) is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
  generation: String,
  origin: Option<Url>,
  default_document: String,
  seed: Vec<String>,
  mirrors: Option<Vec<FileMirror>>,
  fetch_timeout_secs: u64,
  database: Option<PathBuf>,
  log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileMirror {
  primary: Url,
  alternate: Url,
}

impl Default for FileConfig {
  fn default() -> Self {
    Self {
      generation: DEFAULT_GENERATION.to_string(),
      origin: None,
      default_document: "/".to_string(),
      seed: [
        "/",
        "/index.html",
        "https://unpkg.com/three@0.128.0/build/three.min.js",
        "https://unpkg.com/three@0.128.0/examples/js/controls/OrbitControls.js",
        "https://cdn.jsdelivr.net/npm/three@0.128.0/build/three.min.js",
        "https://cdn.jsdelivr.net/npm/three@0.128.0/examples/js/controls/OrbitControls.js",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
      mirrors: None,
      fetch_timeout_secs: 30,
      database: None,
      log_file: None,
    }
  }
}

/// Resolved configuration with every URL parsed and validated.
#[derive(Debug, Clone)]
pub struct Config {
  /// Name of the current cache generation
  pub generation: String,
  /// Origin of the application; relative URLs resolve against it
  pub origin: Url,
  /// Served when the network and the exact cache lookup both fail
  pub default_document: Url,
  /// Resources written into a generation when it installs
  pub seed: Vec<Url>,
  /// Trusted CDN mirrors, served cache-first
  pub mirrors: Vec<MirrorPair>,
  /// Request timeout in seconds, 0 disables it
  pub fetch_timeout_secs: u64,
  pub database: Option<PathBuf>,
  pub log_file: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./cachegate.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/cachegate/config.yaml
  ///
  /// Without a file the compiled-in defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Self::from_file_config(FileConfig::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("cachegate.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("cachegate").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to load config file {}: {}", path.display(), e))
  }

  /// Parse YAML configuration, filling omitted fields with defaults.
  pub fn parse(contents: &str) -> Result<Self> {
    let file: FileConfig = if contents.trim().is_empty() {
      FileConfig::default()
    } else {
      serde_yaml::from_str(contents).map_err(|e| eyre!("Invalid configuration: {}", e))?
    };
    Self::from_file_config(file)
  }

  fn from_file_config(file: FileConfig) -> Result<Self> {
    let generation = file.generation.trim().to_string();
    if generation.is_empty() {
      return Err(eyre!("generation must not be empty"));
    }

    let origin = match file.origin {
      Some(origin) => origin,
      None => Url::parse(DEFAULT_ORIGIN).map_err(|e| eyre!("Invalid origin: {}", e))?,
    };
    if !matches!(origin.scheme(), "http" | "https") || origin.host().is_none() {
      return Err(eyre!("origin must be an http(s) URL with a host: {}", origin));
    }

    let resolve = |s: &str| {
      origin
        .join(s)
        .map_err(|e| eyre!("Invalid URL '{}': {}", s, e))
    };

    let default_document = resolve(&file.default_document)?;
    let seed = file
      .seed
      .iter()
      .map(|s| resolve(s))
      .collect::<Result<Vec<_>>>()?;
    let mirrors = match &file.mirrors {
      Some(mirrors) => mirrors
        .iter()
        .map(|m| MirrorPair::parse(m.primary.as_str(), m.alternate.as_str()))
        .collect::<Result<Vec<_>>>()?,
      None => DEFAULT_MIRRORS
        .iter()
        .map(|(primary, alternate)| MirrorPair::parse(primary, alternate))
        .collect::<Result<Vec<_>>>()?,
    };

    Ok(Self {
      generation,
      origin,
      default_document,
      seed,
      mirrors,
      fetch_timeout_secs: file.fetch_timeout_secs,
      database: file.database,
      log_file: file.log_file,
    })
  }

  /// Resolve a possibly relative URL against the application origin.
  pub fn resolve(&self, url: &str) -> Result<Url> {
    self
      .origin
      .join(url)
      .map_err(|e| eyre!("Invalid URL '{}': {}", url, e))
  }

  pub fn fetch_timeout(&self) -> Option<Duration> {
    (self.fetch_timeout_secs > 0).then(|| Duration::from_secs(self.fetch_timeout_secs))
  }
}
