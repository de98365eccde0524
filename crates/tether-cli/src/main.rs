//! Tether CLI - talk to a JSON API through the resilience layer.
//!
//! Reads are cached in a local SQLite database, writes made while offline
//! are queued there, and `replay`/`watch` deliver them later.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tether_core::config::StoreDefaults;
use tether_core::{
    CredentialProvider, NetworkMonitor, RequestOrchestrator, SqliteStore, StaticCredentials,
    TetherSettings,
};
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Resilient JSON API client with offline write queue")]
struct Args {
    /// API base URL
    #[arg(long, env = "TETHER_BASE_URL")]
    base_url: String,

    /// SQLite database for cached responses and queued writes
    #[arg(long)]
    db: Option<PathBuf>,

    /// JSON settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bearer token sent with every request
    #[arg(long, env = "TETHER_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// GET a path, serving from cache when possible
    Get {
        path: String,
        /// Query parameters as name=value
        #[arg(short, long = "query", value_parser = commands::parse_query)]
        query: Vec<(String, String)>,
        /// Skip the cache lookup and go to the network first
        #[arg(long)]
        refresh: bool,
    },
    /// POST a JSON body
    Post {
        path: String,
        body: String,
        #[arg(long)]
        id: Option<String>,
    },
    /// PUT a JSON body
    Put {
        path: String,
        body: String,
        #[arg(long)]
        id: Option<String>,
    },
    /// DELETE a path
    Delete {
        path: String,
        #[arg(long)]
        id: Option<String>,
    },
    /// List queued writes
    Pending,
    /// Deliver queued writes now
    Replay,
    /// Keep running and replay queued writes whenever connectivity returns
    Watch,
    /// Show storage usage
    Usage,
    /// Remove cached responses
    ClearCache {
        /// Only remove expired entries
        #[arg(long)]
        expired: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let settings = match &args.config {
        Some(path) => TetherSettings::load(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => TetherSettings::default(),
    };

    let db_path = match args.db {
        Some(path) => path,
        None => default_db_path()?,
    };
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    debug!("Using database {}", db_path.display());
    let store = SqliteStore::with_config(&db_path, settings.store_config())?;

    // Probe the API itself unless the settings name other endpoints
    let mut connectivity = settings.connectivity_config();
    if connectivity.probe_urls.is_empty() {
        connectivity.probe_urls = vec![args.base_url.clone()];
    }
    let monitor = Arc::new(NetworkMonitor::with_http_probe(connectivity)?);
    monitor.confirm().await;

    let mut builder = RequestOrchestrator::builder(args.base_url)
        .with_settings(&settings)
        .with_store(Arc::new(store))
        .with_monitor(monitor);
    if let Some(token) = args.token {
        let credentials: Arc<dyn CredentialProvider> = Arc::new(StaticCredentials::new(token));
        builder = builder.with_credentials(credentials);
    }
    let orchestrator = builder.build()?;

    commands::run(&orchestrator, args.command).await
}

fn default_db_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().context("no data directory for this platform")?;
    Ok(data_dir
        .join(StoreDefaults::DATA_DIR_NAME)
        .join(StoreDefaults::DB_FILE_NAME))
}
