//! Trade Lifecycle Engine
//!
//! none → entering → active → exiting(partial) → closed
//!
//! One engine per (network, exchange) group. Each qualified token gets its
//! own task in the shared `TaskSet`: size and buy, then a `PositionMonitor`
//! that ticks at the exit polling interval until the position closes or
//! shutdown is signalled. The `LiveRegistry` is shared by every group so a
//! token never has two tasks on one network.
//!
//! Author: AI-Generated
//! Created: 2026-10-16

pub mod entry;
pub mod exit_rules;
pub mod monitor;
pub mod recovery;
pub mod registry;

pub use monitor::{ExitResult, PositionMonitor, TickOutcome};
pub use recovery::{flatten_active_positions, FacadeMap, RecoveryReport};
pub use registry::LiveRegistry;

use crate::config::{ExitSettings, TradingSettings};
use crate::facade::ContractFacade;
use crate::store::PositionStore;
use crate::tasks::TaskSet;
use crate::types::QualifiedToken;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Attempts at a store write that records a confirmed swap
pub const STORE_WRITE_ATTEMPTS: u32 = 3;
/// Base delay between those attempts (multiplied by the attempt number)
pub const STORE_RETRY_DELAY: Duration = Duration::from_millis(200);

pub struct LifecycleEngine {
    facade: Arc<dyn ContractFacade>,
    store: Arc<dyn PositionStore>,
    trading: TradingSettings,
    exit: ExitSettings,
    registry: LiveRegistry,
    tasks: TaskSet,
    shutdown: watch::Receiver<bool>,
}

impl LifecycleEngine {
    pub fn new(
        facade: Arc<dyn ContractFacade>,
        store: Arc<dyn PositionStore>,
        trading: TradingSettings,
        exit: ExitSettings,
        registry: LiveRegistry,
        tasks: TaskSet,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            facade,
            store,
            trading,
            exit,
            registry,
            tasks,
            shutdown,
        }
    }

    fn group(&self) -> String {
        format!("{}/{}", self.facade.network(), self.facade.exchange())
    }

    /// Run the token's lifecycle in its own task. False when the token
    /// already has a live task on this network.
    pub fn spawn(self: &Arc<Self>, qualified: QualifiedToken) -> bool {
        let token = qualified.token;
        let network = self.facade.network().to_string();
        if !self.registry.try_claim(&network, token, self.facade.exchange()) {
            info!("{:#x} already has a live position task on {}, skipping", token, network);
            return false;
        }

        let engine = Arc::clone(self);
        self.tasks.spawn(async move {
            engine.run(qualified).await;
            engine.registry.release(&network, token);
        });
        true
    }

    /// Enter and monitor until close. `None` when nothing was opened.
    pub async fn run(&self, qualified: QualifiedToken) -> Option<TickOutcome> {
        if !self.trading.enabled {
            info!(
                "👀 Monitor-only: {} ({:#x}) qualified at {:.10}, not buying",
                qualified.metadata.symbol, qualified.token, qualified.initial_price
            );
            return None;
        }

        if let Err(e) = entry::open_position(&*self.facade, &*self.store, &qualified, &self.trading).await {
            warn!("Entry into {:#x} on {} failed: {:#}", qualified.token, self.group(), e);
            return None;
        }

        let monitor = PositionMonitor::new(
            self.facade.clone(),
            self.store.clone(),
            &self.exit,
            self.trading.slippage_tolerance,
            qualified.token,
            qualified.metadata.decimals,
        );
        Some(monitor.run(self.shutdown.clone()).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::mock::{ScriptedFacade, PAIR, TOKEN};
    use crate::store::SqliteStore;
    use crate::types::{native_to_wei, LockReport, TokenMetadata};
    use std::time::Duration;

    fn qualified() -> QualifiedToken {
        QualifiedToken {
            token: TOKEN,
            pair: PAIR,
            metadata: TokenMetadata {
                name: "Test Token".to_string(),
                symbol: "TEST".to_string(),
                decimals: 18,
                total_supply: native_to_wei(1_000_000.0),
            },
            native_liquidity: 60.0,
            token_liquidity: 1_000.0,
            lock: LockReport::default(),
            initial_price: 1.0,
            sellable: Some(true),
        }
    }

    async fn engine(
        facade: Arc<ScriptedFacade>,
        store: Arc<SqliteStore>,
        enabled: bool,
        registry: LiveRegistry,
        tasks: TaskSet,
    ) -> (Arc<LifecycleEngine>, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let trading = TradingSettings { enabled, ..TradingSettings::default() };
        let exit = ExitSettings { polling_interval: 0.0, ..ExitSettings::default() };
        (Arc::new(LifecycleEngine::new(facade, store, trading, exit, registry, tasks, rx)), tx)
    }

    #[tokio::test]
    async fn test_full_lifecycle_to_stop_loss() {
        let facade = Arc::new(ScriptedFacade::new());
        // Price already halved against the 1.0 entry
        facade.set_price(Some(0.5));
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let registry = LiveRegistry::new();
        let tasks = TaskSet::new();
        let (engine, _tx) = engine(facade.clone(), store.clone(), true, registry.clone(), tasks.clone()).await;

        assert!(engine.spawn(qualified()));
        assert_eq!(tokio::time::timeout(Duration::from_secs(5), tasks.drain()).await.unwrap(), 1);

        assert_eq!(facade.buys.lock().unwrap().len(), 1);
        assert_eq!(facade.sells.lock().unwrap().len(), 1);
        assert!(store.get_active_position("bsc", TOKEN).await.unwrap().is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_second_task_for_token_refused() {
        let facade = Arc::new(ScriptedFacade::new());
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let registry = LiveRegistry::new();
        registry.try_claim("bsc", TOKEN, "biswap");
        let tasks = TaskSet::new();

        let (engine, _tx) = engine(facade.clone(), store, true, registry, tasks.clone()).await;
        assert!(!engine.spawn(qualified()));
        assert!(tasks.is_empty());
        assert!(facade.buys.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_drain_lets_position_task_finish() {
        let facade = Arc::new(ScriptedFacade::new());
        facade.set_price(Some(1.0));
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let registry = LiveRegistry::new();
        let tasks = TaskSet::new();
        let (engine, tx) = engine(facade.clone(), store.clone(), true, registry.clone(), tasks.clone()).await;

        assert!(engine.spawn(qualified()));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), tasks.drain()).await.unwrap();

        // Entered, then stopped between ticks with the position left active
        assert_eq!(facade.buys.lock().unwrap().len(), 1);
        assert!(store.get_active_position("bsc", TOKEN).await.unwrap().is_some());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_monitor_only_never_buys() {
        let facade = Arc::new(ScriptedFacade::new());
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let (engine, _tx) = engine(facade.clone(), store, false, LiveRegistry::new(), TaskSet::new()).await;

        assert_eq!(engine.run(qualified()).await, None);
        assert!(facade.buys.lock().unwrap().is_empty());
    }
}
