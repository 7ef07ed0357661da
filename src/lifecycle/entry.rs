// Entry sizing and the opening buy

use super::{STORE_RETRY_DELAY, STORE_WRITE_ATTEMPTS};
use crate::config::TradingSettings;
use crate::facade::ContractFacade;
use crate::store::PositionStore;
use crate::types::{apply_slippage, native_to_wei, wei_to_native, NewPosition, Position, QualifiedToken, TxOutcome};
use alloy::primitives::U256;
use anyhow::{anyhow, bail, Context, Result};
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Wei to spend on a new position.
///
/// Locked liquidity: `balance_percent` of the wallet balance. Unlocked:
/// `usd_notional / spot_price`, never more than the locked-size share.
/// A zero result falls back to `zero_amount_fallback` so no zero-value
/// swap is ever sent.
pub fn size_entry(locked: bool, native_balance: U256, spot_price: f64, trading: &TradingSettings) -> U256 {
    let balance_share = wei_to_native(native_balance) * trading.balance_percent / 100.0;
    let native = if locked {
        balance_share
    } else if spot_price > 0.0 {
        (trading.usd_notional / spot_price).min(balance_share)
    } else {
        0.0
    };

    let amount = native_to_wei(native);
    if amount.is_zero() {
        native_to_wei(trading.zero_amount_fallback)
    } else {
        amount
    }
}

/// Size, buy and persist. Entry price is the qualified spot price and the
/// opening size is what the buy actually delivered.
pub async fn open_position<F: ContractFacade + ?Sized>(
    facade: &F,
    store: &dyn PositionStore,
    qualified: &QualifiedToken,
    trading: &TradingSettings,
) -> Result<Position> {
    let token = qualified.token;
    let wallet = facade
        .wallet_address()
        .ok_or_else(|| anyhow!("no wallet configured"))?;

    let balance = facade
        .get_balance_of(wallet, None)
        .await
        .context("wallet balance read")?;
    let amount_in = size_entry(qualified.lock.is_locked, balance, qualified.initial_price, trading);

    let quote = facade
        .get_quote(amount_in, vec![facade.wrapped_native(), token])
        .await
        .context("entry quote")?;
    let min_out = apply_slippage(quote.last().copied().unwrap_or(U256::ZERO), trading.slippage_tolerance);

    info!(
        "🛒 Buying {} ({:#x}) for {:.6} native (locked={})",
        qualified.metadata.symbol,
        token,
        wei_to_native(amount_in),
        qualified.lock.is_locked
    );

    let (tx_hash, spent, received) = match facade.swap_exact_native_for_tokens(token, amount_in, min_out).await {
        TxOutcome::Confirmed { tx_hash, amount_in, amount_out } => (tx_hash, amount_in, amount_out),
        TxOutcome::Failed { reason } => bail!("buy of {:#x} failed: {}", token, reason),
    };
    if received.is_zero() {
        bail!("buy {} of {:#x} delivered no tokens", tx_hash, token);
    }

    let new = NewPosition {
        token,
        network: facade.network().to_string(),
        exchange: facade.exchange().to_string(),
        entry_price: qualified.initial_price,
        token_amount: received,
        amount_spent: spent,
        tx_hash,
    };
    let position = match record_entry(store, &new).await {
        Ok(position) => position,
        Err(e) => {
            // Unrecorded tokens are invisible to the monitor and to recovery
            error!("🚨 Buy {} of {:#x} confirmed but not recorded: {:#}", new.tx_hash, token, e);
            unwind_entry(facade, received, trading.slippage_tolerance, &new).await;
            return Err(e.context(format!("recording buy {} of {:#x}", new.tx_hash, token)));
        }
    };

    info!("📈 Position #{} open: {} tokens of {:#x}", position.id, received, token);
    Ok(position)
}

async fn record_entry(store: &dyn PositionStore, new: &NewPosition) -> Result<Position> {
    let mut attempt = 1;
    loop {
        match store.create_position(new).await {
            Ok(position) => return Ok(position),
            Err(e) if attempt < STORE_WRITE_ATTEMPTS => {
                warn!(
                    "Recording buy {} failed ({}/{}): {:#}",
                    new.tx_hash, attempt, STORE_WRITE_ATTEMPTS, e
                );
                sleep(STORE_RETRY_DELAY * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Sell back everything an unrecorded buy delivered
async fn unwind_entry<F: ContractFacade + ?Sized>(facade: &F, received: U256, slippage: f64, new: &NewPosition) {
    let min_out = match facade.get_quote(received, vec![new.token, facade.wrapped_native()]).await {
        Ok(amounts) => apply_slippage(amounts.last().copied().unwrap_or(U256::ZERO), slippage),
        Err(e) => {
            warn!("Unwind quote for {:#x} failed, selling without a floor: {}", new.token, e);
            U256::ZERO
        }
    };
    match facade.swap_exact_tokens_for_native(new.token, received, min_out).await {
        TxOutcome::Confirmed { tx_hash, amount_out, .. } => error!(
            "Unwound {} tokens of {:#x} in {} for {:.6} native",
            received,
            new.token,
            tx_hash,
            wei_to_native(amount_out)
        ),
        TxOutcome::Failed { reason } => error!(
            "🚨 Unwind of {:#x} failed, {} tokens held with no position: {}",
            new.token, received, reason
        ),
    }
}
