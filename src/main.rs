//! DEX Pair Sniper
//!
//! Main entry point. Loads `config/sniper.toml` + `.env`, opens the
//! position store, flattens anything a previous run left active, then runs
//! one discovery loop per (network, exchange) group until SIGINT/SIGTERM.
//!
//! Architecture:
//! - One `EndpointPool` + `ChainFacade` per group (no pool is shared
//!   across groups)
//! - Discovery polls factory `PairCreated` logs; each event gets its own
//!   qualification task, and each pass its own lifecycle task
//! - SQLite (`sqlx`) holds tokens, positions, fills and endpoint health
//! - `--dry-run` qualifies and records without sending any transaction
//!
//! Author: AI-Generated
//! Created: 2026-10-16

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use clap::Parser;
use futures::future::join_all;
use futures::StreamExt;
use pair_sniper::config::{split_list, ExchangeConfig, NetworkConfig, SniperConfig};
use pair_sniper::discovery::DiscoveryLoop;
use pair_sniper::facade::{ChainFacade, ContractFacade};
use pair_sniper::lifecycle::{flatten_active_positions, FacadeMap, LifecycleEngine, LiveRegistry};
use pair_sniper::qualification::QualificationPipeline;
use pair_sniper::rpc::{AlloyConnector, EndpointPool};
use pair_sniper::store::{PositionStore, SqliteStore};
use pair_sniper::tasks::TaskSet;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// DEX new-pair sniper: BSC, Ethereum, Polygon
#[derive(Parser)]
#[command(name = "pair-sniper")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "SNIPER_CONFIG", default_value = "config/sniper.toml")]
    config: String,

    /// Qualify and record only; never send a transaction
    #[arg(long, env = "DRY_RUN")]
    dry_run: bool,

    /// Comma-separated networks to run (overrides the config file)
    #[arg(long, env = "SNIPER_NETWORKS")]
    networks: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,
}

/// Everything one (network, exchange) group runs on
struct Group {
    network: NetworkConfig,
    facade: Arc<dyn ContractFacade>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = SniperConfig::load_with_env(&args.config)?;
    init_logging(&config.general.log_level, args.json_logs);

    if args.dry_run {
        config.trading.enabled = false;
    }
    if let Some(list) = &args.networks {
        config.general.active_networks = split_list(list);
    }
    config.validate()?;

    info!("===========================================");
    info!("   DEX Pair Sniper");
    info!("   Mode: {}", if config.trading.enabled { "LIVE TRADING" } else { "monitor-only" });
    info!("===========================================");
    info!("Config file: {}", args.config);

    let signer = match &config.private_key {
        Some(key) if config.trading.enabled => Some(
            key.parse::<PrivateKeySigner>()
                .context("PRIVATE_KEY is not a valid private key")?,
        ),
        _ => None,
    };
    let wallet: Option<Address> = signer.as_ref().map(|s| s.address());
    if let Some(wallet) = wallet {
        info!("Wallet: {:#x}", wallet);
    }

    let store: Arc<dyn PositionStore> = Arc::new(
        SqliteStore::open(&config.general.database_path)
            .await
            .with_context(|| format!("Failed to open store at {}", config.general.database_path))?,
    );
    info!("Store: {}", config.general.database_path);

    // Build one pool + facade per group
    let mut groups = Vec::new();
    for network in config.active_networks() {
        for exchange in &network.exchanges {
            let facade = build_facade(&config, network, exchange, signer.clone(), wallet, store.clone()).await?;
            info!(
                "  {}/{}: factory {:#x}, router {:#x}, {} endpoint(s)",
                network.name,
                exchange.name,
                exchange.factory,
                exchange.router,
                network.rpc_urls.len()
            );
            groups.push(Group { network: network.clone(), facade });
        }
    }

    // Crash recovery runs to completion before any discovery starts
    let facades: FacadeMap = groups
        .iter()
        .map(|g| ((g.network.name.clone(), g.facade.exchange().to_string()), g.facade.clone()))
        .collect();
    if config.trading.enabled {
        flatten_active_positions(&*store, &facades, config.trading.slippage_tolerance).await?;
    } else {
        let leftover = store.list_active_positions(None, None).await?;
        if !leftover.is_empty() {
            warn!("{} active position(s) left from a previous run; not flattening in monitor-only mode", leftover.len());
        }
    }

    // Shutdown: SIGINT/SIGTERM flip the watch; loops exit between ticks
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    tokio::spawn(async move {
        if let Some(sig) = signals.next().await {
            info!("Received signal {} - shutting down", sig);
            let _ = shutdown_tx.send(true);
        }
    });

    let registry = LiveRegistry::new();
    let tasks = TaskSet::new();
    let mut loops = Vec::new();
    for group in groups {
        let name = format!("{}/{}", group.network.name, group.facade.exchange());
        let pipeline = Arc::new(QualificationPipeline::new(
            group.facade.clone(),
            store.clone(),
            config.qualification.clone(),
            &group.network,
            config.trading.slippage_tolerance,
            config.trading.enabled,
        ));
        let engine = Arc::new(LifecycleEngine::new(
            group.facade.clone(),
            store.clone(),
            config.trading.clone(),
            config.exit.clone(),
            registry.clone(),
            tasks.clone(),
            shutdown_rx.clone(),
        ));
        let discovery = DiscoveryLoop::new(
            group.facade,
            pipeline,
            engine,
            config.discovery.clone(),
            tasks.clone(),
            shutdown_rx.clone(),
        );
        loops.push(async move { (name, tokio::spawn(discovery.run()).await) });
    }

    info!("🚀 {} discovery loop(s) running", loops.len());
    for (name, result) in join_all(loops).await {
        match result {
            Ok(Ok(())) => info!("{} discovery stopped", name),
            Ok(Err(e)) => error!("{} discovery ended: {:#}", name, e),
            Err(e) => error!("{} discovery task panicked: {}", name, e),
        }
    }

    // Qualifications and open positions outlive discovery. Monitors stop
    // between ticks on shutdown; a swap in flight always completes first.
    if !tasks.is_empty() {
        info!(
            "Waiting on {} in-flight task(s), {} live position(s)",
            tasks.len(),
            registry.len()
        );
    }
    let joined = tasks.drain().await;
    if joined > 0 {
        info!("{} in-flight task(s) finished", joined);
    }

    info!("Pair sniper stopped");
    Ok(())
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if json {
        fmt().json().with_env_filter(filter).with_target(false).init();
    } else {
        fmt().with_env_filter(filter).with_target(false).init();
    }
}

async fn build_facade(
    config: &SniperConfig,
    network: &NetworkConfig,
    exchange: &ExchangeConfig,
    signer: Option<PrivateKeySigner>,
    wallet: Option<Address>,
    store: Arc<dyn PositionStore>,
) -> Result<Arc<dyn ContractFacade>> {
    let pool = EndpointPool::new(
        &network.name,
        &network.rpc_urls,
        AlloyConnector::new(signer),
        store,
        config.endpoints.clone(),
    )
    .await?;

    Ok(Arc::new(ChainFacade::new(
        Arc::new(pool),
        &network.name,
        exchange.clone(),
        config.trading.clone(),
        wallet,
    )))
}
