//! mtrelay server
//!
//! Aggregates trading-signal events from upstream relays, deduplicates them,
//! streams them to downstream clients and settles recorded trades.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

mod api;
mod config;
mod server;
mod shutdown;
mod state;

use clap::Parser;
use config::file::{LogFormat, StorageBackend};
use config::{ConfigLoader, get_database_url};
use mtrelay_core::dedup::DedupEngine;
use mtrelay_core::events::{fanout_job_channel, ingest_channel};
use mtrelay_core::framework::DatabaseProcessor;
use mtrelay_core::hub::StreamHub;
use mtrelay_core::metrics::RelayMetrics;
use mtrelay_core::processors::{
    EventRouter, FanoutWorker, RelayPool, RetentionSweeper, SettlementWorker,
};
use mtrelay_core::sealing::ChaChaSealer;
use mtrelay_core::settlement::{ExplorerVerifier, SettlementService};
use mtrelay_core::storage::{PgStore, Stores};
use metrics_exporter_prometheus::PrometheusBuilder;
use server::{build_router, run_server};
use shutdown::spawn_config_reload_handler;
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// mtrelay - copy-trading signal relay
#[derive(Parser, Debug)]
#[command(name = "mtrelay-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./mtrelay.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // The log format lives in the config file, so load it before tracing
    // exists and report failures on stderr.
    let config_loader = Arc::new(ConfigLoader::new(&args.config, args.listen));
    let loaded_config = config_loader.load().map_err(|e| {
        eprintln!("Failed to load configuration: {e}");
        e
    })?;

    init_tracing(loaded_config.server.log_format);
    tracing::info!("Starting mtrelay-server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Configuration loaded from {:?}", args.config);
    if loaded_config.token_rewritten {
        tracing::info!("Plaintext control token hashed and written back");
    }

    let settings = loaded_config.server.clone();
    let shared_config = loaded_config.shared();

    // Storage backend
    let db_pool = match settings.backend {
        StorageBackend::Postgres => {
            let database_url = get_database_url().map_err(|e| {
                tracing::error!("DATABASE_URL environment variable not set");
                e
            })?;

            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(settings.db_max_connections)
                .connect(&database_url)
                .await
                .map_err(|e| {
                    tracing::error!("Failed to connect to database: {}", e);
                    e
                })?;
            tracing::info!("Database connection established");

            if args.migrate {
                tracing::info!("Running database migrations...");
                sqlx::migrate!("../migrations").run(&pool).await.map_err(|e| {
                    tracing::error!("Failed to run migrations: {}", e);
                    e
                })?;
                tracing::info!("Migrations completed successfully");
            }
            Some(pool)
        }
        StorageBackend::Memory => {
            tracing::warn!("Running with in-memory storage, nothing survives a restart");
            None
        }
    };
    let stores = match &db_pool {
        Some(pool) => Stores::postgres(PgStore::new(DatabaseProcessor::new(pool.clone()))),
        None => Stores::memory(),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let prometheus = PrometheusBuilder::new().install_recorder().map_err(|e| {
        tracing::error!("Failed to install metrics recorder: {}", e);
        e
    })?;
    let metrics = Arc::new(RelayMetrics::default());
    metrics.describe();
    let hub = StreamHub::new(loaded_config.router.outbound_buffer, metrics.clone());

    let dedup = Arc::new(DedupEngine::new(&loaded_config.dedup, stores.dedup.clone()));
    if let Err(e) = dedup.warm(loaded_config.dedup.warm_limit).await {
        tracing::warn!(error = %e, "Failed to warm deduplication tiers, starting cold");
    }

    let settlement = SettlementService::new(
        stores.ledger.clone(),
        shared_config.credit.clone(),
        metrics.clone(),
    );

    // Pipeline
    let (ingest_tx, ingest_rx) = ingest_channel();
    let (fanout_tx, fanout_rx) = fanout_job_channel();

    let relays = RelayPool::new(
        loaded_config.relay.clone(),
        ingest_tx,
        metrics.clone(),
        shutdown_rx.clone(),
    );
    relays.start();

    let router = EventRouter::new(
        loaded_config.router.clone(),
        dedup.clone(),
        hub.clone(),
        Some(fanout_tx),
        metrics.clone(),
        ingest_rx,
        shutdown_rx.clone(),
    );
    let fanout = FanoutWorker::new(
        stores.registry.clone(),
        settlement.clone(),
        Arc::new(ChaChaSealer::new()),
        hub.clone(),
        metrics.clone(),
        fanout_rx,
        shutdown_rx.clone(),
    );
    let sweeper = RetentionSweeper::new(
        loaded_config.dedup.clone(),
        stores.dedup.clone(),
        shutdown_rx.clone(),
    );

    let mut tasks = vec![
        tokio::spawn(router.run()),
        tokio::spawn(fanout.run()),
        tokio::spawn(sweeper.run()),
    ];
    match &loaded_config.settlement {
        Some(settlement_config) => {
            let worker = SettlementWorker::new(
                settlement_config.clone(),
                stores.ledger.clone(),
                settlement.clone(),
                Arc::new(ExplorerVerifier::new(settlement_config)),
                metrics.clone(),
                shutdown_rx.clone(),
            );
            tasks.push(tokio::spawn(worker.run()));
        }
        None => {
            tracing::info!("No explorer configured, trades settle only through the control API");
        }
    }

    let state = AppState {
        stores,
        config: shared_config,
        settlement,
        dedup,
        relays: relays.clone(),
        hub: hub.clone(),
        metrics,
        prometheus,
        platform_pubkey: settings.platform_pubkey.as_deref().map(Arc::from),
        fanout_enabled: loaded_config.router.fanout_enabled,
    };

    // Spawn config reload handler (listens for SIGHUP)
    let reload_notify = spawn_config_reload_handler(state.clone(), config_loader);

    tracing::info!("Starting HTTP server on {}", settings.listen);
    let result = run_server(build_router(state), settings.listen).await;

    // Stop upstream first so the router drains what is already queued.
    tracing::info!("Stopping background tasks...");
    reload_notify.notify_one();
    relays.stop();
    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Background task ended abnormally");
        }
    }
    hub.close_all();

    if let Some(pool) = db_pool {
        tracing::info!("Closing database connections...");
        pool.close().await;
    }
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}
