use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use usage_tracker::aggregator::aggregate_with_limit;
use usage_tracker::config::{init_config, Config};
use usage_tracker::credentials::{ChainedTokens, StaticToken, TokenProvider};
use usage_tracker::display::DisplayManager;
use usage_tracker::logging::init_logging;
use usage_tracker::models::SessionRecord;
use usage_tracker::poller::MAX_POLL_INTERVAL;
use usage_tracker::{UsagePoller, TOP_SESSIONS_LIMIT};

#[derive(Parser)]
#[command(name = "usage-tracker")]
#[command(about = "Claude subscription usage windows and per-session usage summaries")]
#[command(version)]
struct Cli {
    /// Bearer token to use instead of the stored credentials
    #[arg(long, global = true, env = "USAGE_TRACKER_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch subscription usage once
    Snapshot {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Keep polling subscription usage and print every change
    Watch {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
        /// Poll interval in seconds (overrides configuration)
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Summarize session usage from a JSON array of session records
    Stats {
        /// Path to the sessions file
        file: PathBuf,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
        /// Number of top sessions to list
        #[arg(long, default_value_t = TOP_SESSIONS_LIMIT)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Snapshot { json: false });
    let json = match &command {
        Commands::Snapshot { json } | Commands::Watch { json, .. } | Commands::Stats { json, .. } => *json,
    };

    let config = match init_config() {
        Ok(config) => config,
        Err(e) => return handle_error(e.context("Failed to load configuration"), json),
    };
    let _log_guard = init_logging(&config.logging, &config.paths.log_directory);

    let result = match command {
        Commands::Snapshot { json } => run_snapshot(config, cli.token, json).await,
        Commands::Watch { json, interval } => run_watch(config, cli.token, json, interval).await,
        Commands::Stats { file, json, limit } => run_stats(&file, json, limit),
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) => handle_error(e, json),
    }
}

fn token_provider(config: &Config, token: Option<String>) -> Arc<dyn TokenProvider> {
    match token {
        Some(token) => Arc::new(StaticToken::new(token)),
        None => Arc::new(ChainedTokens::env_then_file(&config.paths.credentials_file)),
    }
}

#[cfg(feature = "http")]
fn build_fetcher(
    config: &Config,
    token: Option<String>,
) -> Result<usage_tracker::UsageFetcher<usage_tracker::fetcher::HttpTransport>> {
    use usage_tracker::fetcher::HttpTransport;

    Ok(usage_tracker::UsageFetcher::with_settings(
        HttpTransport::new(),
        token_provider(config, token),
        config.api.settings(),
    ))
}

#[cfg(not(feature = "http"))]
fn build_fetcher(
    _config: &Config,
    _token: Option<String>,
) -> Result<usage_tracker::UsageFetcher<NoTransport>> {
    anyhow::bail!("This build has no HTTP transport; rebuild with the `http` feature")
}

#[cfg(not(feature = "http"))]
struct NoTransport;

#[cfg(not(feature = "http"))]
#[async_trait::async_trait]
impl usage_tracker::UsageTransport for NoTransport {
    async fn get(
        &self,
        _request: &usage_tracker::fetcher::UsageRequest,
    ) -> usage_tracker::error::Result<usage_tracker::fetcher::TransportResponse> {
        Err(usage_tracker::UsageError::Transport("no transport".to_string()))
    }
}

async fn run_snapshot(config: &Config, token: Option<String>, json: bool) -> Result<()> {
    let fetcher = build_fetcher(config, token)?;
    let outcome = fetcher.fetch().await;
    DisplayManager::new(json).display_outcome(&outcome);
    Ok(())
}

async fn run_watch(
    config: &Config,
    token: Option<String>,
    json: bool,
    interval: Option<u64>,
) -> Result<()> {
    let fetcher = build_fetcher(config, token)?;
    let interval = match interval {
        Some(0) => anyhow::bail!("Poll interval must be greater than 0"),
        Some(secs) if secs > MAX_POLL_INTERVAL.as_secs() => anyhow::bail!(
            "Poll interval must be at most {} seconds",
            MAX_POLL_INTERVAL.as_secs()
        ),
        Some(secs) => std::time::Duration::from_secs(secs),
        None => config.poller.interval(),
    };
    if interval < std::time::Duration::from_secs(30) {
        warn!(
            interval_secs = interval.as_secs(),
            "Poll interval is very short, the usage API may rate limit requests"
        );
    }

    let display = DisplayManager::new(json);
    let poller = UsagePoller::with_interval(fetcher, interval);
    let mut events = poller.subscribe();
    poller.start();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => display.display_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Display fell behind usage events");
                    display.display_state(&poller.current());
                }
                Err(RecvError::Closed) => break,
            },
            _ = &mut ctrl_c => {
                info!("Interrupted, stopping usage poller");
                break;
            }
        }
    }

    poller.stop();
    Ok(())
}

fn run_stats(file: &Path, json: bool, limit: usize) -> Result<()> {
    let content = fs::read_to_string(file)
        .with_context(|| format!("Failed to read sessions file: {}", file.display()))?;
    let sessions: Vec<SessionRecord> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse sessions file: {}", file.display()))?;

    let stats = aggregate_with_limit(&sessions, limit);
    DisplayManager::new(json).display_stats(&stats);
    Ok(())
}

fn handle_error(e: anyhow::Error, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::json!({"error": format!("{:#}", e)}));
    } else {
        eprintln!("Error: {:#}", e);
    }
    process::exit(1);
}
