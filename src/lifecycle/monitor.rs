//! Position Monitor
//!
//! Per-position evaluation loop. Each tick re-reads the active row, quotes
//! one whole token through the router and applies the exit plan from
//! `exit_rules::evaluate`. Ticks for one position are strictly sequential;
//! a sell already submitted always runs to completion before the loop can
//! observe shutdown.
//!
//! A sell that confirmed on-chain but could not be recorded is held as a
//! pending fill. The next tick records it before anything else is decided,
//! so a tier is never sold twice from a stale remaining size.
//!
//! Price misses are counted per monitor. After `max_price_misses`
//! consecutive misses the position is closed without a sell, as
//! `token_not_found` when the token has no code left and
//! `price_check_failed` otherwise.
//!
//! Author: AI-Generated
//! Created: 2026-10-16

use super::exit_rules::{evaluate, ExitAction};
use super::{STORE_RETRY_DELAY, STORE_WRITE_ATTEMPTS};
use crate::config::{secs, ExitSettings};
use crate::error::{CallResult, SniperError};
use crate::facade::ContractFacade;
use crate::store::PositionStore;
use crate::types::{
    apply_slippage, one_token, wei_to_native, CloseReason, ExitFill, ExitRuleSet, FillOutcome,
    Position, TxOutcome,
};
use alloy::primitives::{Address, U256};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Result of one tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Active,
    /// Close reason as persisted
    Closed(String),
}

#[derive(Debug, PartialEq)]
enum PendingFill {
    Clear,
    Held,
    /// The held fill was the closing sell
    Closed(String),
}

/// One sell to submit against the current remaining size
#[derive(Debug, Clone)]
pub struct ExitOrder {
    pub amount: U256,
    /// Native per token at decision time
    pub price: f64,
    pub reason: String,
    pub tier_key: Option<String>,
}

/// Native per whole token, quoted through the router
pub async fn quote_price<F: ContractFacade + ?Sized>(
    facade: &F,
    token: Address,
    decimals: u8,
) -> CallResult<f64> {
    let amounts = facade
        .get_quote(one_token(decimals), vec![token, facade.wrapped_native()])
        .await?;
    let out = amounts.last().copied().unwrap_or(U256::ZERO);
    if out.is_zero() {
        return Err(SniperError::ContractLogic("zero quote".to_string()));
    }
    Ok(wei_to_native(out))
}

/// What became of one submitted exit
#[derive(Debug, Clone, PartialEq)]
pub enum ExitResult {
    /// Nothing was sold; the next tick decides again
    NotSold,
    /// Sold and recorded; the position after the fill
    Recorded(Position),
    /// Sold on-chain, but the store refused the fill
    Refused,
    /// Sold on-chain, but the fill could not be written yet
    Unrecorded(ExitFill),
}

/// Write a confirmed fill, retrying store errors. Replays are safe: the
/// fill is keyed by its tx hash.
pub async fn persist_fill(store: &dyn PositionStore, fill: &ExitFill) -> anyhow::Result<FillOutcome> {
    let mut attempt = 1;
    loop {
        match store.update_remaining(fill).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) if attempt < STORE_WRITE_ATTEMPTS => {
                warn!(
                    "Recording fill {} for {:#x} failed ({}/{}): {:#}",
                    fill.tx_hash, fill.token, attempt, STORE_WRITE_ATTEMPTS, e
                );
                sleep(STORE_RETRY_DELAY * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Quote, sell with slippage and record the fill
pub async fn submit_exit<F: ContractFacade + ?Sized>(
    facade: &F,
    store: &dyn PositionStore,
    position: &Position,
    order: ExitOrder,
    slippage: f64,
) -> ExitResult {
    let token = position.token;
    let quote = match facade.get_quote(order.amount, vec![token, facade.wrapped_native()]).await {
        Ok(amounts) => amounts.last().copied().unwrap_or(U256::ZERO),
        Err(e) => {
            warn!("Sell quote for {:#x} ({}) failed: {}", token, order.reason, e);
            return ExitResult::NotSold;
        }
    };
    let min_out = apply_slippage(quote, slippage);

    let (tx_hash, proceeds) = match facade.swap_exact_tokens_for_native(token, order.amount, min_out).await {
        TxOutcome::Confirmed { tx_hash, amount_out, .. } => (tx_hash, amount_out),
        TxOutcome::Failed { reason } => {
            warn!("❌ Sell of {:#x} ({}) failed: {}", token, order.reason, reason);
            return ExitResult::NotSold;
        }
    };

    let fill = ExitFill {
        token,
        network: position.network.clone(),
        tx_hash,
        previous_remaining: position.remaining,
        amount_sold: order.amount,
        proceeds,
        price: order.price,
        reason: order.reason,
        tier_key: order.tier_key,
    };

    let updated = match persist_fill(store, &fill).await {
        Ok(FillOutcome::Applied(updated)) => updated,
        Ok(FillOutcome::Duplicate) => {
            // An earlier attempt committed before its error surfaced
            debug!("Fill {} for {:#x} was already recorded", fill.tx_hash, token);
            let mut updated = position.clone();
            updated.apply_fill(&fill);
            updated
        }
        Ok(FillOutcome::Rejected(why)) => {
            error!("{}", SniperError::DataIntegrity(format!("fill {} refused: {}", fill.tx_hash, why)));
            return ExitResult::Refused;
        }
        Err(e) => {
            error!("🚨 Sell {} of {:#x} confirmed but not recorded: {:#}", fill.tx_hash, token, e);
            return ExitResult::Unrecorded(fill);
        }
    };

    info!(
        "💰 Sold {} of {:#x} for {:.6} native ({}), {} left",
        fill.amount_sold,
        token,
        wei_to_native(fill.proceeds),
        fill.reason,
        updated.remaining
    );
    ExitResult::Recorded(updated)
}

/// `percent` of `remaining`, in basis points
pub fn tier_amount(remaining: U256, percent: f64) -> U256 {
    let bps = (percent.clamp(0.0, 100.0) * 100.0).round() as u64;
    remaining * U256::from(bps) / U256::from(10_000u64)
}

pub struct PositionMonitor {
    facade: Arc<dyn ContractFacade>,
    store: Arc<dyn PositionStore>,
    rules: ExitRuleSet,
    slippage: f64,
    max_price_misses: u32,
    polling_interval: Duration,
    network: String,
    token: Address,
    decimals: u8,
    misses: u32,
    grace_checked: bool,
    /// Confirmed sell still to be written
    pending_fill: Option<ExitFill>,
}

impl PositionMonitor {
    pub fn new(
        facade: Arc<dyn ContractFacade>,
        store: Arc<dyn PositionStore>,
        exit: &ExitSettings,
        slippage: f64,
        token: Address,
        decimals: u8,
    ) -> Self {
        Self {
            network: facade.network().to_string(),
            facade,
            store,
            rules: exit.rule_set(),
            slippage,
            max_price_misses: exit.max_price_misses.max(1),
            polling_interval: secs(exit.polling_interval),
            token,
            decimals,
            misses: 0,
            grace_checked: false,
            pending_fill: None,
        }
    }

    /// Tick until the position closes or shutdown is signalled
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> TickOutcome {
        loop {
            if *shutdown.borrow() {
                if self.record_pending().await == PendingFill::Held {
                    error!("🚨 Stopping with an unrecorded sell for {:#x}", self.token);
                }
                info!("Monitor for {:#x} stopping on shutdown", self.token);
                return TickOutcome::Active;
            }

            if let TickOutcome::Closed(reason) = self.tick().await {
                info!("🏁 Position {:#x} closed: {}", self.token, reason);
                return TickOutcome::Closed(reason);
            }

            tokio::select! {
                _ = sleep(self.polling_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return TickOutcome::Active;
                    }
                }
            }
        }
    }

    /// Write the held fill, if any
    async fn record_pending(&mut self) -> PendingFill {
        let Some(fill) = self.pending_fill.take() else {
            return PendingFill::Clear;
        };
        match persist_fill(&*self.store, &fill).await {
            Ok(FillOutcome::Applied(updated)) => {
                info!("Recorded held fill {} for {:#x}", fill.tx_hash, self.token);
                match updated.close_reason {
                    Some(reason) if updated.remaining.is_zero() => PendingFill::Closed(reason),
                    _ => PendingFill::Clear,
                }
            }
            Ok(FillOutcome::Duplicate) => PendingFill::Clear,
            Ok(FillOutcome::Rejected(why)) => {
                error!("{}", SniperError::DataIntegrity(format!("held fill {} refused: {}", fill.tx_hash, why)));
                PendingFill::Clear
            }
            Err(e) => {
                warn!("Held fill {} for {:#x} still unrecorded: {:#}", fill.tx_hash, self.token, e);
                self.pending_fill = Some(fill);
                PendingFill::Held
            }
        }
    }

    pub async fn tick(&mut self) -> TickOutcome {
        // No new sell is decided while a confirmed one is unrecorded
        match self.record_pending().await {
            PendingFill::Clear => {}
            PendingFill::Held => return TickOutcome::Active,
            PendingFill::Closed(reason) => return TickOutcome::Closed(reason),
        }

        let mut position = match self.store.get_active_position(&self.network, self.token).await {
            Ok(Some(position)) => position,
            Ok(None) => {
                warn!("{}", SniperError::DataIntegrity(format!("no active position for {:#x}", self.token)));
                return TickOutcome::Closed("missing".to_string());
            }
            Err(e) => {
                warn!("Position read for {:#x} failed: {:#}", self.token, e);
                return TickOutcome::Active;
            }
        };

        let price = match quote_price(&*self.facade, self.token, self.decimals).await {
            Ok(price) => {
                self.misses = 0;
                price
            }
            Err(e) => return self.price_miss(e).await,
        };

        let grace_due = !self.grace_checked
            && (Utc::now() - position.opened_at).num_seconds() >= self.rules.grace_period_secs as i64;
        let plan = evaluate(
            &self.rules,
            position.entry_price,
            position.highest_price,
            &position.tiers_hit,
            price,
            grace_due,
        );
        debug!(
            "{:#x} price {:.10} ratio {:.3} → {} action(s)",
            self.token,
            price,
            price / position.entry_price,
            plan.actions.len()
        );

        if plan.grace_settled {
            info!("✨ {:#x} met the {}x grace target", self.token, self.rules.grace_target_multiplier);
            self.grace_checked = true;
        }

        if let Some(high) = plan.new_high {
            if let Err(e) = self.store.update_high_water(&self.network, self.token, high).await {
                warn!("High-water update for {:#x} failed: {:#}", self.token, e);
            }
            position.highest_price = high;
        }

        for action in plan.actions {
            let order = match action {
                ExitAction::TakeProfit(tier) => {
                    let amount = tier_amount(position.remaining, tier.percent);
                    if amount.is_zero() {
                        // Nothing left to sell at this tier
                        if let Err(e) = self.store.mark_tier_hit(&self.network, self.token, &tier.key()).await {
                            warn!("Marking {} on {:#x} failed: {:#}", tier.key(), self.token, e);
                        }
                        continue;
                    }
                    info!("🎯 {:#x} hit {}x, selling {}% of remaining", self.token, tier.multiplier, tier.percent);
                    ExitOrder {
                        amount,
                        price,
                        reason: CloseReason::take_profit(&tier).to_string(),
                        tier_key: Some(tier.key()),
                    }
                }
                ExitAction::FullExit(reason) => {
                    info!("🚪 {:#x} full exit: {}", self.token, reason);
                    ExitOrder {
                        amount: position.remaining,
                        price,
                        reason: reason.to_string(),
                        tier_key: None,
                    }
                }
            };

            match submit_exit(&*self.facade, &*self.store, &position, order, self.slippage).await {
                ExitResult::Recorded(updated) => position = updated,
                ExitResult::Unrecorded(fill) => {
                    self.pending_fill = Some(fill);
                    return TickOutcome::Active;
                }
                ExitResult::NotSold | ExitResult::Refused => return TickOutcome::Active,
            }
            if position.remaining.is_zero() {
                return TickOutcome::Closed(position.close_reason.unwrap_or_default());
            }
        }

        TickOutcome::Active
    }

    async fn price_miss(&mut self, cause: SniperError) -> TickOutcome {
        self.misses += 1;
        warn!(
            "⚠️ Price check {}/{} for {:#x} failed: {}",
            self.misses, self.max_price_misses, self.token, cause
        );
        if self.misses < self.max_price_misses {
            return TickOutcome::Active;
        }

        let reason = match self.facade.get_code_size(self.token).await {
            Ok(0) => CloseReason::TokenNotFound,
            _ => CloseReason::PriceCheckFailed,
        };
        match self.store.close_position(&self.network, self.token, &reason.to_string()).await {
            Ok(()) => TickOutcome::Closed(reason.to_string()),
            Err(e) => {
                error!("Force close of {:#x} failed: {:#}", self.token, e);
                TickOutcome::Active
            }
        }
    }
}
