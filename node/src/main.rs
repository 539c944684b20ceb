// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # tanglecart Shop Node
//!
//! Entry point for the `tanglecart-node` binary. Parses CLI arguments,
//! initializes logging and metrics, wires the purchase controller to its
//! store, ledger and grant executor, and serves the HTTP API.
//!
//! The binary supports three subcommands:
//!
//! - `run`     - start the shop node
//! - `init`    - write a default config and catalog into a data directory
//! - `version` - print build version information

mod api;
mod cli;
mod cooldown;
mod logging;
mod metrics;
mod names;
mod rcon;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use tanglecart::catalog::Catalog;
use tanglecart::config::{
    AddressMode, GrantMode, ShopConfig, CATALOG_FILE_NAME, CONFIG_FILE_NAME,
    GRANT_QUEUE_CAPACITY, LEDGER_API_VERSION,
};
use tanglecart::ledger::{AddressAllocator, HttpLedgerGateway, LedgerGateway, MockLedger};
use tanglecart::storage::{SledStore, StoreCursor, TransactionStore};
use tanglecart::transaction::{
    grant_channel, spawn_grant_worker, ActionExecutor, TransactionController,
};

use cli::{Commands, LedgerKind, ShopNodeCli};
use cooldown::Cooldown;
use logging::LogFormat;
use metrics::ShopMetrics;
use names::NameCache;
use rcon::{LogExecutor, RconExecutor};

/// How often expired cooldown entries are dropped.
const COOLDOWN_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// How long shutdown waits for queued grants to finish.
const GRANT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ShopNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the shop node: API server, metrics endpoint, and grant worker.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_FILTER, args.log_format);

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| args.data_dir.join(CONFIG_FILE_NAME));
    let config = ShopConfig::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    tracing::info!(
        config = %config_path.display(),
        data_dir = %args.data_dir.display(),
        ledger = ?args.ledger,
        api_port = config.api.port,
        metrics_port = config.api.metrics_port,
        "starting tanglecart-node"
    );

    // --- Catalog ---
    let catalog_path = args.data_dir.join(CATALOG_FILE_NAME);
    let catalog = Arc::new(
        Catalog::load(&catalog_path)
            .with_context(|| format!("failed to load catalog from {}", catalog_path.display()))?,
    );
    tracing::info!(products = catalog.len(), "catalog loaded");

    // --- Persistent storage ---
    let db_path = config.storage_path(&args.data_dir);
    let db = Arc::new(
        SledStore::open(&db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?,
    );
    tracing::info!(
        path = %db_path.display(),
        pending = db.pending_count(),
        completed = db.completed_count(),
        "database opened"
    );
    let store: Arc<dyn TransactionStore> = db.clone();

    // --- Ledger ---
    let allocator = match config.address.mode {
        AddressMode::Seed => AddressAllocator::Seeded {
            seed: config.normalized_seed(),
            cursor: Arc::new(StoreCursor(store.clone())),
        },
        AddressMode::Address => AddressAllocator::Fixed(config.address.address.clone()),
    };
    let ledger: Arc<dyn LedgerGateway> = match args.ledger {
        LedgerKind::Node => {
            let gateway = HttpLedgerGateway::new(
                config.ledger.node_url.clone(),
                allocator,
                config.verification_timeout(),
            )
            .context("failed to build ledger client")?;
            tracing::info!(node = %gateway.node_url(), "using ledger node");
            Arc::new(gateway)
        }
        LedgerKind::Mock => {
            tracing::warn!("using the in-process mock ledger, no real payment will verify");
            Arc::new(MockLedger::with_allocator(allocator))
        }
    };

    // --- Grants ---
    let executor: Arc<dyn ActionExecutor> = match config.grants.mode {
        GrantMode::Log => {
            tracing::warn!("grant mode is log, purchased commands will not be executed");
            Arc::new(LogExecutor)
        }
        GrantMode::Rcon => {
            let rcon = RconExecutor::new(&config.grants.rcon);
            tracing::info!(address = %rcon.address(), "granting over rcon");
            Arc::new(rcon)
        }
    };
    let (publisher, grant_rx) = grant_channel(GRANT_QUEUE_CAPACITY);
    let grant_worker = spawn_grant_worker(grant_rx, executor);

    // --- Controller ---
    let names = Arc::new(NameCache::new());
    let controller = Arc::new(TransactionController::new(
        store,
        catalog,
        ledger,
        config.verification_timeout(),
        publisher,
        names.clone(),
    ));

    // --- Metrics ---
    let shop_metrics = Arc::new(ShopMetrics::new().context("failed to register metrics")?);

    // --- Cooldown ---
    let cooldown = Arc::new(Cooldown::new(config.cooldown()));
    let cooldown_ref = Arc::clone(&cooldown);
    let purge_loop = tokio::spawn(async move {
        let mut interval = tokio::time::interval(COOLDOWN_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            cooldown_ref.purge_expired();
            tracing::debug!(tracked = cooldown_ref.len(), "cooldown entries purged");
        }
    });

    // --- Application state ---
    let app_state = api::AppState {
        version: format!(
            "{} (ledger api {})",
            env!("CARGO_PKG_VERSION"),
            LEDGER_API_VERSION
        ),
        controller,
        metrics: Arc::clone(&shop_metrics),
        cooldown,
        names,
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", config.api.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&shop_metrics));
    let metrics_addr = format!("0.0.0.0:{}", config.api.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    purge_loop.abort();

    // The servers, and with them the last controller handle, are gone, so
    // the grant queue is closed. Let the worker finish what is queued.
    match tokio::time::timeout(GRANT_DRAIN_TIMEOUT, grant_worker).await {
        Ok(Ok(())) => tracing::info!("grant queue drained"),
        Ok(Err(e)) => tracing::error!("grant worker panicked: {}", e),
        Err(_) => tracing::warn!("grant queue not drained within {:?}", GRANT_DRAIN_TIMEOUT),
    }

    if let Err(e) = db.flush().await {
        tracing::error!("failed to flush database: {}", e);
    }

    tracing::info!("tanglecart-node stopped");
    Ok(())
}

/// Initializes a data directory with a default config and catalog. Existing
/// files are left untouched.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("tanglecart_node=info", LogFormat::Pretty);

    let data_dir = &args.data_dir;
    tracing::info!(data_dir = %data_dir.display(), "initializing data directory");

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let config_path = data_dir.join(CONFIG_FILE_NAME);
    if config_path.exists() {
        tracing::info!(path = %config_path.display(), "config exists, keeping it");
    } else {
        ShopConfig::write_default(&config_path)
            .with_context(|| format!("failed to write {}", config_path.display()))?;
        tracing::info!(path = %config_path.display(), "default config written");
    }

    let catalog_path = data_dir.join(CATALOG_FILE_NAME);
    if catalog_path.exists() {
        tracing::info!(path = %catalog_path.display(), "catalog exists, keeping it");
    } else {
        Catalog::write_defaults(&catalog_path)
            .with_context(|| format!("failed to write {}", catalog_path.display()))?;
        tracing::info!(path = %catalog_path.display(), "default catalog written");
    }

    println!("Data directory initialized.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Config         : {}", config_path.display());
    println!("  Catalog        : {}", catalog_path.display());
    println!();
    println!("Set address.seed (or address.mode = \"address\") in the config before running.");

    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("tanglecart-node {}", env!("CARGO_PKG_VERSION"));
    println!("ledger api      {}", LEDGER_API_VERSION);
    println!("rustc           {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported. If a handler cannot be
/// installed, that signal is never reported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
