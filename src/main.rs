mod cache;
mod commands;
mod config;
mod logging;
mod net;
mod worker;

use clap::{ArgAction, Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;

use cache::SqliteStorage;
use net::HttpFetcher;
use worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "cachegate")]
#[command(about = "Generational request cache: cache-first for CDN mirrors, network-first for the app")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./cachegate.yaml, then $XDG_CONFIG_HOME/cachegate/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Path to the cache database (default: $XDG_DATA_HOME/cachegate/cache.db)
  #[arg(long, global = true)]
  database: Option<PathBuf>,

  /// Increase log verbosity (-v info, -vv debug)
  #[arg(short, long, action = ArgAction::Count, global = true)]
  verbose: u8,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Seed the current generation's store
  Install,
  /// Delete stale generations and serve from the current one
  Activate,
  /// Route requests through the cache
  Fetch(commands::FetchArgs),
  /// List cache stores (* marks the active one)
  Stores,
  /// List entries of a store (default: current generation)
  Keys { store: Option<String> },
  /// Remove entries from the current generation's store
  Evict {
    #[arg(required = true)]
    urls: Vec<String>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(args.verbose, config.log_file.as_deref())?;

  let database = match args.database.or_else(|| config.database.clone()) {
    Some(path) => path,
    None => SqliteStorage::default_path()?,
  };
  let storage = Arc::new(SqliteStorage::open(&database)?);
  let fetcher = Arc::new(HttpFetcher::from_config(&config)?);
  let worker = Worker::new(&config, Arc::clone(&storage), fetcher)?;

  match args.command {
    Command::Install => commands::install(&worker).await,
    Command::Activate => commands::activate(&worker).await,
    Command::Fetch(fetch_args) => commands::fetch(&worker, &config, fetch_args).await,
    Command::Stores => commands::stores(storage.as_ref()),
    Command::Keys { store } => {
      let name = store.unwrap_or_else(|| config.generation.clone());
      commands::keys(storage, &name)
    }
    Command::Evict { urls } => commands::evict(storage, &config, &urls),
  }
}
