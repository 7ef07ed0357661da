// Exit rule evaluation for one price tick
//
// Pure function over the position's entry, high-water mark and triggered
// tiers. Priority is fixed: stop-loss, take-profit tiers (ascending),
// trailing stop, then the one-shot grace check. A stop-loss suppresses
// everything after it; a trailing stop suppresses the grace exit.

use crate::types::{CloseReason, ExitRuleSet, TakeProfitTier};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq)]
pub enum ExitAction {
    /// Sell all remaining size and close
    FullExit(CloseReason),
    /// Sell `tier.percent` of the current remaining size
    TakeProfit(TakeProfitTier),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickPlan {
    /// Executed in order; stops at the first failed sell
    pub actions: Vec<ExitAction>,
    /// New high-water mark to persist
    pub new_high: Option<f64>,
    /// Grace boundary reached with the target met; never check again
    pub grace_settled: bool,
}

/// Decide what to do at `price`. `grace_due` is true once the grace period
/// has elapsed and the check has not settled yet.
pub fn evaluate(
    rules: &ExitRuleSet,
    entry_price: f64,
    highest_price: f64,
    tiers_hit: &BTreeSet<String>,
    price: f64,
    grace_due: bool,
) -> TickPlan {
    let mut plan = TickPlan::default();
    if entry_price <= 0.0 {
        return plan;
    }
    let ratio = price / entry_price;

    if ratio <= rules.stop_loss_ratio {
        plan.actions.push(ExitAction::FullExit(CloseReason::StopLoss));
        return plan;
    }

    for tier in &rules.take_profit_tiers {
        if ratio >= tier.multiplier && !tiers_hit.contains(&tier.key()) {
            plan.actions.push(ExitAction::TakeProfit(*tier));
        }
    }

    if rules.trailing_stop_enabled {
        if price > highest_price {
            plan.new_high = Some(price);
        } else if highest_price > 0.0 {
            let drawdown = (highest_price - price) / highest_price * 100.0;
            if drawdown >= rules.trailing_stop_percent {
                plan.actions.push(ExitAction::FullExit(CloseReason::TrailingStop));
                if grace_due && ratio >= rules.grace_target_multiplier {
                    plan.grace_settled = true;
                }
                return plan;
            }
        }
    }

    if grace_due {
        if ratio < rules.grace_target_multiplier {
            plan.actions.push(ExitAction::FullExit(CloseReason::grace_expired(
                rules.grace_target_multiplier,
                rules.grace_period_secs,
            )));
        } else {
            plan.grace_settled = true;
        }
    }

    plan
}
