//! Crash Recovery
//!
//! Positions still `active` at startup are never resumed. Every one whose
//! (network, exchange) group is configured this run gets a full-size sell
//! with reason `initial_close` before discovery starts. Positions from
//! groups that are not configured are reported and left alone.
//!
//! Author: AI-Generated
//! Created: 2026-10-16

use super::monitor::{quote_price, submit_exit, ExitOrder, ExitResult};
use crate::facade::ContractFacade;
use crate::store::PositionStore;
use crate::types::{CloseReason, Position, MAX_TOKEN_DECIMALS};
use anyhow::Result;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Facades keyed by (network, exchange)
pub type FacadeMap = HashMap<(String, String), Arc<dyn ContractFacade>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub flattened: usize,
    pub failed: usize,
    /// Group not configured this run
    pub skipped: usize,
}

pub async fn flatten_active_positions(
    store: &dyn PositionStore,
    facades: &FacadeMap,
    slippage: f64,
) -> Result<RecoveryReport> {
    let positions = store.list_active_positions(None, None).await?;
    let mut report = RecoveryReport::default();
    if positions.is_empty() {
        return Ok(report);
    }
    info!("♻️  Flattening {} position(s) left active by a previous run", positions.len());

    let mut pending = Vec::new();
    for position in positions {
        let key = (position.network.clone(), position.exchange.clone());
        match facades.get(&key) {
            Some(facade) => pending.push(flatten(facade.clone(), store, position, slippage)),
            None => {
                warn!(
                    "Position #{} ({:#x}) on {}/{} is not configured this run, leaving it active",
                    position.id, position.token, position.network, position.exchange
                );
                report.skipped += 1;
            }
        }
    }

    for closed in join_all(pending).await {
        if closed {
            report.flattened += 1;
        } else {
            report.failed += 1;
        }
    }

    info!(
        "Recovery done: {} flattened, {} failed, {} skipped",
        report.flattened, report.failed, report.skipped
    );
    Ok(report)
}

async fn flatten(
    facade: Arc<dyn ContractFacade>,
    store: &dyn PositionStore,
    position: Position,
    slippage: f64,
) -> bool {
    let reason = CloseReason::InitialClose.to_string();
    if position.remaining.is_zero() {
        return match store.close_position(&position.network, position.token, &reason).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Closing empty position #{} failed: {:#}", position.id, e);
                false
            }
        };
    }

    let decimals = match facade.get_token_metadata(position.token).await {
        Ok(metadata) if metadata.decimals <= MAX_TOKEN_DECIMALS => metadata.decimals,
        _ => 18,
    };
    let price = quote_price(&*facade, position.token, decimals).await.unwrap_or(0.0);

    let order = ExitOrder {
        amount: position.remaining,
        price,
        reason,
        tier_key: None,
    };
    match submit_exit(&*facade, store, &position, order, slippage).await {
        ExitResult::Recorded(updated) if updated.remaining.is_zero() => true,
        ExitResult::Unrecorded(fill) => {
            error!(
                "🚨 Position #{} ({:#x}) sold in {} but the row stays active; close it by hand",
                position.id, position.token, fill.tx_hash
            );
            false
        }
        _ => {
            warn!("Position #{} ({:#x}) could not be flattened and stays active", position.id, position.token);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::mock::{ScriptedFacade, TOKEN};
    use crate::store::SqliteStore;
    use crate::types::NewPosition;
    use alloy::primitives::{address, Address, U256};

    async fn seed(store: &SqliteStore, token: Address, network: &str, exchange: &str) {
        store
            .create_position(&NewPosition {
                token,
                network: network.to_string(),
                exchange: exchange.to_string(),
                entry_price: 1.0,
                token_amount: U256::from(1_000u64),
                amount_spent: U256::from(1_000u64),
                tx_hash: format!("0xentry{:x}", token),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_flattens_configured_and_skips_unknown() {
        let store = SqliteStore::in_memory().await.unwrap();
        let stray = address!("5555555555555555555555555555555555555555");
        seed(&store, TOKEN, "bsc", "pancakeswap").await;
        seed(&store, stray, "polygon", "quickswap").await;

        let facade = Arc::new(ScriptedFacade::new());
        let mut facades = FacadeMap::new();
        facades.insert(("bsc".to_string(), "pancakeswap".to_string()), facade.clone());

        let report = flatten_active_positions(&store, &facades, 0.03).await.unwrap();
        assert_eq!(report, RecoveryReport { flattened: 1, failed: 0, skipped: 1 });

        assert!(store.get_active_position("bsc", TOKEN).await.unwrap().is_none());
        assert!(store.get_active_position("polygon", stray).await.unwrap().is_some());

        let history = store.list_history("bsc", TOKEN).await.unwrap();
        let sell = history.iter().find(|h| h.action == "sell").unwrap();
        assert_eq!(sell.reason.as_deref(), Some("initial_close"));
        assert_eq!(sell.amount, U256::from(1_000u64));
    }

    #[tokio::test]
    async fn test_failed_flatten_leaves_position() {
        let store = SqliteStore::in_memory().await.unwrap();
        seed(&store, TOKEN, "bsc", "pancakeswap").await;

        let facade = Arc::new(ScriptedFacade::new());
        *facade.fail_sells.lock().unwrap() = true;
        let mut facades = FacadeMap::new();
        facades.insert(("bsc".to_string(), "pancakeswap".to_string()), facade);

        let report = flatten_active_positions(&store, &facades, 0.03).await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(store.get_active_position("bsc", TOKEN).await.unwrap().is_some());
    }
}
