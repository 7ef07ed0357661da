//! Pair Analysis
//!
//! Liquidity sampling reads, spot price from reserves and LP lock detection.
//!
//! Liquidity is measured in native units as the larger of the
//! reserve-implied native side and the pair's direct native balance, so a
//! pair whose reserves lag its balance (or the reverse) is not
//! under-counted.
//!
//! Author: AI-Generated
//! Created: 2026-10-16

use crate::error::CallResult;
use crate::facade::ContractFacade;
use crate::types::{
    scale_units, wei_to_native, LockReport, LockShare, Rejection, TokenMetadata, MAX_TOKEN_DECIMALS,
};
use alloy::primitives::{Address, U256};
use std::collections::BTreeMap;
use tracing::debug;

/// Figures computed once a pair has qualified
#[derive(Debug, Clone, PartialEq)]
pub struct PairAnalysis {
    pub metadata: TokenMetadata,
    /// Native units
    pub native_liquidity: f64,
    /// Token units
    pub token_liquidity: f64,
    /// Native per whole token
    pub initial_price: f64,
}

/// Native per whole token, `None` when either side is empty
pub fn spot_price(token_reserve: U256, native_reserve: U256, decimals: u8) -> Option<f64> {
    if token_reserve.is_zero() || native_reserve.is_zero() {
        return None;
    }
    let tokens = scale_units(token_reserve, decimals);
    let native = wei_to_native(native_reserve);
    Some(native / tokens)
}

/// One liquidity sample, in native units
pub async fn sample_liquidity<F: ContractFacade + ?Sized>(
    facade: &F,
    token: Address,
    pair: Address,
) -> CallResult<f64> {
    let reserves = facade.get_reserves(pair).await?;
    let (_, native_reserve) = reserves.split_for(token);
    let direct = facade.get_balance_of(pair, None).await?;
    Ok(wei_to_native(native_reserve).max(wei_to_native(direct)))
}

/// Metadata, both-sided liquidity and spot price
pub async fn analyze_pair<F: ContractFacade + ?Sized>(
    facade: &F,
    token: Address,
    pair: Address,
) -> CallResult<Result<PairAnalysis, Rejection>> {
    let metadata = facade.get_token_metadata(token).await?;
    if metadata.decimals > MAX_TOKEN_DECIMALS {
        return Ok(Err(Rejection::AnalysisFailed(format!(
            "decimals {} out of range",
            metadata.decimals
        ))));
    }
    let reserves = facade.get_reserves(pair).await?;
    let (token_reserve, native_reserve) = reserves.split_for(token);
    let direct = facade.get_balance_of(pair, None).await?;

    let Some(initial_price) = spot_price(token_reserve, native_reserve, metadata.decimals) else {
        return Ok(Err(Rejection::EmptyReserves));
    };

    Ok(Ok(PairAnalysis {
        native_liquidity: wei_to_native(native_reserve).max(wei_to_native(direct)),
        token_liquidity: scale_units(token_reserve, metadata.decimals),
        initial_price,
        metadata,
    }))
}

/// Share of the pair's LP supply held by each known lock contract.
/// Locked when one platform holds at least `threshold_percent`.
pub async fn detect_lock<F: ContractFacade + ?Sized>(
    facade: &F,
    pair: Address,
    lock_contracts: &BTreeMap<String, Address>,
    threshold_percent: f64,
) -> CallResult<LockReport> {
    let mut report = LockReport::default();
    if lock_contracts.is_empty() {
        return Ok(report);
    }

    let total_supply = facade.get_total_supply(pair).await?;
    if total_supply.is_zero() {
        return Ok(report);
    }

    for (platform, locker) in lock_contracts {
        let held = facade.get_token_balance(pair, *locker).await?;
        if held.is_zero() {
            continue;
        }
        let percent = scale_units(held, 0) / scale_units(total_supply, 0) * 100.0;
        debug!("LP lock on {:#x}: {} holds {:.2}%", pair, platform, percent);

        if percent >= threshold_percent && !report.is_locked {
            report.is_locked = true;
            report.platform = Some(platform.clone());
        }
        report.shares.push(LockShare { platform: platform.clone(), percent });
    }

    Ok(report)
}
