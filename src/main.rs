use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use archive_screenshot_collector::archiver::{Collector, Pacer, SessionManager};
use archive_screenshot_collector::config::Config;
use archive_screenshot_collector::recorder::FsRecorder;
use archive_screenshot_collector::wayback::CdxClient;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    info!("Starting archive-screenshot-collector");

    // Load and validate configuration before any network activity
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        urls = config.source_urls.len(),
        interval = ?config.interval,
        start = %config.start.date_naive(),
        end = %config.end.date_naive(),
        "Configuration loaded"
    );

    // The index client and the session manager share one pacer; index queries
    // and replay navigations count against the same minimum interval.
    let pacer = Arc::new(Pacer::new(config.pacing_interval));
    let locator = CdxClient::new(Arc::clone(&pacer));
    let backend = SessionManager::new(config.session_config(), pacer);
    let recorder = FsRecorder::open(&config.output_dir)
        .await
        .context("Failed to open output directory")?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested, finishing current snapshot");
            signal_cancel.cancel();
        }
    });

    let collector = Collector::new(
        locator,
        backend,
        recorder,
        config.collector_config(),
        cancel,
    );

    let summary = collector.run(&config.snapshot_requests()).await?;

    info!(
        urls = summary.urls_processed,
        skipped_urls = summary.urls_skipped,
        captured = summary.captured,
        failed = summary.failed,
        unfulfilled = summary.unfulfilled,
        already_recorded = summary.already_recorded,
        cancelled = summary.cancelled,
        "Collection run complete"
    );

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,archive_screenshot_collector=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}
