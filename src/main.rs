//! CLI entry point for the GTFS departures service.
//!
//! Provides subcommands for querying upcoming departures, loading the static
//! feed once or on an interval, and reading the import ledger.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gtfs_departures::{
    config::Config,
    departures::DepartureQuery,
    fetch::BasicClient,
    ledger::ImportLedger,
    loader::FeedLoader,
    scheduler::LoadScheduler,
    store::Store,
};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "gtfs_departures")]
#[command(about = "Next scheduled departures from a static GTFS feed", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the next departures for a stop and route as JSON
    Departures {
        /// Rider-facing stop code, e.g. "21055"
        #[arg(value_name = "STOP_CODE")]
        stop_code: String,

        /// Route short name, e.g. "123"
        #[arg(value_name = "ROUTE_NAME")]
        route_name: String,

        /// Maximum number of departures to print
        #[arg(short, long, default_value_t = 2)]
        limit: usize,
    },
    /// Load the feed once, replacing the stored one
    Load {
        /// Feed zip URL or local path (defaults to GTFS_URL)
        #[arg(short, long)]
        url: Option<String>,
    },
    /// Reload the feed periodically
    Refresh {
        /// Feed zip URL or local path (defaults to GTFS_URL)
        #[arg(short, long)]
        url: Option<String>,

        /// Seconds between loads
        #[arg(short, long, default_value_t = 86_400)]
        interval: u64,

        /// Number of loads to run (0 = infinite)
        #[arg(short = 'n', long, default_value_t = 0)]
        count: usize,
    },
    /// Print the most recent feed import attempts as JSON
    Imports {
        /// Key required when LEDGER_API_KEY is set
        #[arg(long)]
        api_key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    let _log_guard = init_tracing()?;

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let store = Store::connect(&config.database_url, 5)
        .await
        .with_context(|| format!("connecting to {}", config.database_url))?;
    store.migrate().await.context("applying schema")?;

    match cli.command {
        Commands::Departures {
            stop_code,
            route_name,
            limit,
        } => {
            let query = DepartureQuery::new(
                store,
                config.service_patterns.clone(),
                config.agency_timezone,
            )
            .with_limit(limit);

            let times = match query.next_departures(&stop_code, &route_name).await {
                Ok(times) => times,
                Err(e) => {
                    error!(stop_code = %stop_code, route_name = %route_name, error = %e, "Departure query failed");
                    Vec::new()
                }
            };
            println!("{}", serde_json::to_string(&times)?);
        }
        Commands::Load { url } => {
            let source = feed_source(url, &config)?;
            let scheduler = scheduler(store, &config)?;

            let ack = scheduler.trigger(&source);
            info!(url = %ack.url, accepted_at = %ack.accepted_at, "Load acknowledged");

            let summary = ack.wait().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Refresh {
            url,
            interval,
            count,
        } => {
            let source = feed_source(url, &config)?;
            let scheduler = scheduler(store, &config)?;

            if count == 0 {
                info!(interval, "Refreshing indefinitely. Press Ctrl+C to stop.");
            } else {
                info!(count, interval, "Starting scheduled refreshes");
            }
            scheduler
                .refresh_every(&source, Duration::from_secs(interval), count)
                .await;
        }
        Commands::Imports { api_key } => {
            let ledger = ImportLedger::new(
                store,
                config.agency_timezone,
                config.ledger_api_key.clone(),
            );
            let records = ledger.authorized_recent_imports(api_key.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
    }

    Ok(())
}

const DEFAULT_LOG_FILE: &str = "logs/gtfs_departures.log";

/// Splits `LOG_FILE_PATH` into the directory and file-name prefix for the
/// daily appender. A bare file name logs into `logs/`.
fn log_file_location(path: &str) -> (PathBuf, OsString) {
    let path = Path::new(path);
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("logs"),
    };
    let name = path
        .file_name()
        .map(OsStr::to_os_string)
        .unwrap_or_else(|| OsString::from("gtfs_departures.log"));
    (dir, name)
}

/// Human-readable events on stderr (`RUST_LOG`, default info) and JSON
/// events in a daily log file (`RUST_LOG_JSON`, default debug). Keep the
/// returned guard alive until exit so buffered file events are flushed.
fn init_tracing() -> Result<WorkerGuard> {
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| DEFAULT_LOG_FILE.to_string());
    let (log_dir, log_file_name) = log_file_location(&log_file_path);

    let (json_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, log_file_name));

    let console = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_file = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(json_writer)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(console)
        .with(json_file)
        .init();
    Ok(guard)
}

fn feed_source(url: Option<String>, config: &Config) -> Result<String> {
    url.or_else(|| config.gtfs_url.clone())
        .context("no feed given: pass --url or set GTFS_URL")
}

fn scheduler(store: Store, config: &Config) -> Result<LoadScheduler<BasicClient>> {
    let client = BasicClient::with_timeout(config.feed_timeout)?;
    let loader = FeedLoader::new(client, store, config.filter.clone());
    Ok(LoadScheduler::new(loader, config.max_concurrent_loads))
}
