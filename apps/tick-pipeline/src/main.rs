//! Tick Pipeline Binary
//!
//! Starts the feed supervisor, ingestion loop, keepalive and retention
//! tasks, and the health server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin tick-pipeline
//! ```
//!
//! # Environment Variables
//!
//! All optional.
//! - `FEED_SYMBOLS`: comma-separated symbols (default: btcusdt,ethusdt,bnbusdt)
//! - `FEED_WS_BASE_URL`: stream endpoint (default: wss://fstream.binance.com/ws)
//! - `FEED_STREAM`: aggTrade | trade (default: aggTrade)
//! - `TICK_DB_PATH`: SQLite file (default: ticks.db)
//! - `TICK_RETENTION_DAYS`: purge age, 0 disables (default: 1)
//! - `PIPELINE_HEALTH_PORT`: health/metrics HTTP port (default: 8000)
//! - `BACKFILL_CSV` + `BACKFILL_SYMBOL`: one-shot OHLCV import at startup
//! - `OTEL_ENABLED`: export traces over OTLP (default: false)
//! - `RUST_LOG`: log filter (default: `tick_pipeline=info`)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tick_pipeline::infrastructure::backfill::read_ohlcv_file;
use tick_pipeline::infrastructure::feed::FeedEvent;
use tick_pipeline::infrastructure::telemetry;
use tick_pipeline::{
    BinanceConnector, BroadcastConfig, Broadcaster, FeedSupervisor, HealthServer,
    HealthServerState, MarketDataService, Pipeline, PipelineConfig, SupervisorConfig, TickStore,
    init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Upper bound on draining the tick channel after the feed stops.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let telemetry_guard = telemetry::init();

    tracing::info!(
        otel_export = telemetry_guard.is_exporting(),
        "Starting Tick Pipeline"
    );

    let _metrics_handle = init_metrics();

    let config = PipelineConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let store = Arc::new(
        TickStore::open(&config.store.db_path)
            .with_context(|| format!("failed to open {}", config.store.db_path.display()))?,
    );

    let market_data = Arc::new(MarketDataService::new(
        store.clone(),
        config.analytics.params(),
        config.analytics.history_limit,
    ));

    if let Some(backfill) = &config.backfill {
        let batch = read_ohlcv_file(&backfill.csv_path)
            .with_context(|| format!("failed to read {}", backfill.csv_path.display()))?;
        let file_rejected = batch.rejected.len();
        let report = market_data.backfill(&backfill.symbol, batch.rows).await;
        tracing::info!(
            symbol = %backfill.symbol,
            inserted = report.inserted,
            rejected = report.rejected + file_rejected,
            "Startup backfill imported"
        );
    }

    let shutdown_token = CancellationToken::new();

    let broadcaster = Arc::new(Broadcaster::new(BroadcastConfig::from(&config.broadcast)));
    let pipeline = Pipeline::new(store.clone(), broadcaster.clone());

    let connector = Arc::new(BinanceConnector::from_feed_settings(&config.feed));
    let (supervisor, tick_rx, event_rx) = FeedSupervisor::start(
        connector,
        &config.feed.symbols,
        SupervisorConfig::from_feed_settings(&config.feed),
        &shutdown_token,
    );
    let supervisor = Arc::new(supervisor);

    // Ingestion ends on its own once every connection has dropped its sender.
    let ingest = tokio::spawn(async move {
        let ingested = pipeline.run(tick_rx, CancellationToken::new()).await;
        tracing::info!(ingested, "Ingestion finished");
    });

    tokio::spawn(log_feed_events(event_rx));

    tokio::spawn(Arc::clone(&broadcaster).run_keepalive(shutdown_token.clone()));

    if let Some(max_age) = config.store.retention {
        let market_data = Arc::clone(&market_data);
        let cancel = shutdown_token.clone();
        let interval = config.store.retention_interval;
        tokio::spawn(async move {
            market_data.run_retention(cancel, interval, max_age).await;
        });
    }

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&supervisor),
        Arc::clone(&broadcaster),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!("Tick pipeline ready");

    await_shutdown(shutdown_token).await;

    supervisor.stop().await;
    if tokio::time::timeout(DRAIN_TIMEOUT, ingest).await.is_err() {
        tracing::warn!(
            timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "Ingestion did not drain in time"
        );
    }
    broadcaster.shutdown();

    tracing::info!("Tick pipeline stopped");
    Ok(())
}

/// Log lifecycle events from the feed connections.
async fn log_feed_events(mut rx: mpsc::Receiver<FeedEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            FeedEvent::Connected { symbol } => {
                tracing::info!(symbol = %symbol, "Feed connected");
            }
            FeedEvent::Disconnected { symbol, reason } => {
                tracing::warn!(symbol = %symbol, reason = %reason, "Feed disconnected");
            }
            FeedEvent::Reconnecting {
                symbol,
                attempt,
                delay,
            } => {
                tracing::debug!(
                    symbol = %symbol,
                    attempt,
                    delay_secs = delay.as_secs(),
                    "Feed reconnect scheduled"
                );
            }
            FeedEvent::Malformed { symbol, error } => {
                tracing::debug!(symbol = %symbol, error = %error, "Malformed feed message");
            }
            FeedEvent::Abandoned { symbol, attempts } => {
                tracing::error!(symbol = %symbol, attempts, "Feed abandoned");
            }
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &PipelineConfig) {
    tracing::info!(
        symbols = ?config.feed.symbols,
        stream = %config.feed.stream,
        db_path = %config.store.db_path.display(),
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        base_url = %config.feed.base_url,
        max_reconnect_attempts = config.feed.max_reconnect_attempts,
        retention_secs = config.store.retention.map(|d| d.as_secs()),
        "Feed and store settings"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
    tracing::info!("Graceful shutdown started");
}
