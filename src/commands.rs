//! Host-side commands that fire the worker's lifecycle triggers.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use reqwest::Method;
use std::io::Write;
use std::sync::Arc;

use crate::cache::{
  CacheStorage, CacheStore, CachedResponse, RequestKey, ResponseSnapshot, ResponseSource,
};
use crate::config::Config;
use crate::net::{parse_header, Fetcher, Request};
use crate::worker::{FetchOutcome, Worker};

#[derive(clap::Args, Debug)]
pub struct FetchArgs {
  /// HTTP method
  #[arg(short = 'X', long, default_value = "GET")]
  pub method: String,

  /// Extra request header, as 'Name: value'
  #[arg(short = 'H', long = "header")]
  pub headers: Vec<String>,

  /// Request body
  #[arg(short, long)]
  pub data: Option<String>,

  /// Write response bodies to stdout (summaries go to stderr)
  #[arg(long)]
  pub body: bool,

  /// URLs to request; relative URLs resolve against the configured origin
  #[arg(required = true)]
  pub urls: Vec<String>,
}

pub async fn install<S: CacheStorage, F: Fetcher>(worker: &Worker<S, F>) -> Result<()> {
  let report = worker.on_install().await?;
  println!(
    "{}: {} seeded, {} failed",
    worker.generations().generation(),
    report.seeded.len(),
    report.failed.len()
  );
  for url in &report.failed {
    println!("  failed {}", url);
  }
  Ok(())
}

pub async fn activate<S: CacheStorage, F: Fetcher>(worker: &Worker<S, F>) -> Result<()> {
  let report = worker.on_activate().await?;
  println!("{}: active", worker.generations().generation());
  for name in &report.removed {
    println!("  removed {}", name);
  }
  for name in &report.failed {
    println!("  failed to remove {}", name);
  }
  Ok(())
}

pub async fn fetch<S: CacheStorage, F: Fetcher>(
  worker: &Worker<S, F>,
  config: &Config,
  args: FetchArgs,
) -> Result<()> {
  let method = Method::from_bytes(args.method.to_uppercase().as_bytes())
    .map_err(|e| eyre!("Invalid method '{}': {}", args.method, e))?;
  let headers = args
    .headers
    .iter()
    .map(|h| parse_header(h))
    .collect::<Result<Vec<_>>>()?;

  let requests = args
    .urls
    .iter()
    .map(|u| -> Result<Request> {
      let mut request = Request::new(method.clone(), config.resolve(u)?);
      request.headers = headers.clone();
      if let Some(data) = &args.data {
        request = request.with_body(data.clone());
      }
      Ok(request)
    })
    .collect::<Result<Vec<_>>>()?;

  if !worker.generations().is_active() {
    eprintln!(
      "note: generation {} is not active, requests are not intercepted",
      worker.generations().generation()
    );
  }

  let results = join_all(requests.iter().map(|r| route(worker, r))).await;

  let mut stdout = std::io::stdout().lock();
  for (request, result) in requests.iter().zip(results) {
    let line = match &result {
      Ok((response, source)) => format!(
        "{} {} {} {} ({} bytes)",
        response.status,
        source.map_or("passthrough", |s| s.as_str()),
        request.method,
        request.url,
        response.body.len()
      ),
      Err(error) => format!("ERR passthrough {} {}: {}", request.method, request.url, error),
    };

    if args.body {
      eprintln!("{}", line);
      if let Ok((response, _)) = &result {
        stdout
          .write_all(&response.body)
          .map_err(|e| eyre!("Failed to write body: {}", e))?;
      }
    } else {
      writeln!(stdout, "{}", line).map_err(|e| eyre!("Failed to write output: {}", e))?;
    }
  }

  Ok(())
}

/// Answer one request, sending it to the network directly when the worker
/// does not intercept it. Passthrough responses carry no source.
async fn route<S: CacheStorage, F: Fetcher>(
  worker: &Worker<S, F>,
  request: &Request,
) -> Result<(ResponseSnapshot, Option<ResponseSource>)> {
  match worker.on_fetch(request).await {
    FetchOutcome::Handled(resolved) => Ok((resolved.response, Some(resolved.source))),
    FetchOutcome::Passthrough => Ok((worker.fetcher().fetch(request).await?, None)),
  }
}

pub fn stores<S: CacheStorage>(storage: &S) -> Result<()> {
  let active = storage.active_generation()?;
  for name in storage.store_names()? {
    let marker = if active.as_deref() == Some(name.as_str()) {
      "*"
    } else {
      " "
    };
    println!("{} {}", marker, name);
  }
  Ok(())
}

pub fn keys<S: CacheStorage>(storage: Arc<S>, name: &str) -> Result<()> {
  if !storage.store_names()?.iter().any(|n| n == name) {
    return Err(eyre!("Cache store {} not found", name));
  }

  let store = CacheStore::attach(storage, name);
  for key in store.keys()? {
    match store.get(&key)? {
      Some(cached) => println!("{}", describe_entry(&key, &cached)),
      None => println!("- - {} {}", key.method, key.url),
    }
  }
  Ok(())
}

fn describe_entry(key: &RequestKey, cached: &CachedResponse) -> String {
  format!(
    "{} {} {} {} ({} bytes, cached {})",
    cached.response.status,
    cached.response.response_type.as_str(),
    key.method,
    key.url,
    cached.response.body.len(),
    cached.cached_at.format("%Y-%m-%d %H:%M:%S")
  )
}

pub fn evict<S: CacheStorage>(storage: Arc<S>, config: &Config, urls: &[String]) -> Result<()> {
  let store = CacheStore::attach(storage, &config.generation);
  for u in urls {
    let key = RequestKey::get(&config.resolve(u)?);
    if store.delete(&key)? {
      println!("removed {}", key);
    } else {
      println!("not cached {}", key);
    }
  }
  Ok(())
}
