// Core data structures shared by the pool, qualification and lifecycle code

use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// 1e18 as f64, for wei <-> native conversions in logs and sizing
pub const WEI_PER_NATIVE: f64 = 1e18;

/// Convert a wei amount to native units (lossy, display/sizing only)
pub fn wei_to_native(wei: U256) -> f64 {
    u256_to_f64(wei) / WEI_PER_NATIVE
}

/// Convert native units to wei, truncating below 1 wei
pub fn native_to_wei(amount: f64) -> U256 {
    if !amount.is_finite() || amount <= 0.0 {
        return U256::ZERO;
    }
    U256::from((amount * WEI_PER_NATIVE) as u128)
}

/// Lossy U256 -> f64 (enough for prices and liquidity figures)
pub fn u256_to_f64(value: U256) -> f64 {
    value.to_string().parse::<f64>().unwrap_or(f64::MAX)
}

/// Scale a token amount by its decimals
pub fn scale_units(value: U256, decimals: u8) -> f64 {
    u256_to_f64(value) / 10f64.powi(decimals as i32)
}

/// Largest decimals whose whole-token amount fits in a U256 (10^77 < 2^256)
pub const MAX_TOKEN_DECIMALS: u8 = 77;

/// One whole token in base units. Callers keep `decimals` within
/// `MAX_TOKEN_DECIMALS`.
pub fn one_token(decimals: u8) -> U256 {
    U256::from(10u64).pow(U256::from(decimals))
}

/// Minimum acceptable output for a quote (0.03 tolerance keeps 97%),
/// computed in basis points so the quote never passes through f64
pub fn apply_slippage(quote: U256, tolerance: f64) -> U256 {
    let keep_bps = ((1.0 - tolerance.clamp(0.0, 1.0)) * 10_000.0).round() as u64;
    quote * U256::from(keep_bps) / U256::from(10_000u64)
}

// ── Endpoints ──────────────────────────────────────────────────────────

/// One RPC endpoint as tracked by the pool
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub url: String,
    /// Position in the try-order (0 = tried first)
    pub rank: usize,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, rank: usize) -> Self {
        Self {
            url: url.into(),
            rank,
            consecutive_failures: 0,
            last_success: None,
            last_error: None,
        }
    }
}

// ── Exit rules ─────────────────────────────────────────────────────────

/// (price multiple, percent of remaining) partial exit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitTier {
    pub multiplier: f64,
    pub percent: f64,
}

impl TakeProfitTier {
    /// Persisted tier key, e.g. `tp_2x`
    pub fn key(&self) -> String {
        format!("tp_{}x", self.multiplier)
    }
}

/// Immutable exit policy applied to every position of an engine
#[derive(Debug, Clone, PartialEq)]
pub struct ExitRuleSet {
    /// Full exit when current/entry <= this ratio
    pub stop_loss_ratio: f64,
    /// Sorted ascending by multiplier
    pub take_profit_tiers: Vec<TakeProfitTier>,
    pub trailing_stop_enabled: bool,
    /// Drawdown from the high, in percent
    pub trailing_stop_percent: f64,
    pub grace_period_secs: u64,
    pub grace_target_multiplier: f64,
}

impl ExitRuleSet {
    pub fn new(
        stop_loss_ratio: f64,
        mut take_profit_tiers: Vec<TakeProfitTier>,
        trailing_stop_enabled: bool,
        trailing_stop_percent: f64,
        grace_period_secs: u64,
        grace_target_multiplier: f64,
    ) -> Self {
        take_profit_tiers.sort_by(|a, b| a.multiplier.total_cmp(&b.multiplier));
        Self {
            stop_loss_ratio,
            take_profit_tiers,
            trailing_stop_enabled,
            trailing_stop_percent,
            grace_period_secs,
            grace_target_multiplier,
        }
    }
}

// ── Positions ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Active,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Active => "active",
            PositionStatus::Closed => "closed",
        }
    }
}

/// Why a position was (or is being) exited
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    StopLoss,
    TakeProfit { multiplier: String },
    TrailingStop,
    /// Failed to reach the grace target in time, e.g. `no_2x_in_5min`
    GraceExpired { target: String, period: String },
    TokenNotFound,
    PriceCheckFailed,
    InitialClose,
}

impl CloseReason {
    pub fn take_profit(tier: &TakeProfitTier) -> Self {
        CloseReason::TakeProfit { multiplier: format!("{}", tier.multiplier) }
    }

    pub fn grace_expired(target_multiplier: f64, period_secs: u64) -> Self {
        let period = if period_secs >= 60 && period_secs % 60 == 0 {
            format!("{}min", period_secs / 60)
        } else {
            format!("{}s", period_secs)
        };
        CloseReason::GraceExpired { target: format!("{}", target_multiplier), period }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CloseReason::StopLoss => write!(f, "stop_loss"),
            CloseReason::TakeProfit { multiplier } => write!(f, "take_profit_{}x", multiplier),
            CloseReason::TrailingStop => write!(f, "trailing_stop"),
            CloseReason::GraceExpired { target, period } => write!(f, "no_{}x_in_{}", target, period),
            CloseReason::TokenNotFound => write!(f, "token_not_found"),
            CloseReason::PriceCheckFailed => write!(f, "price_check_failed"),
            CloseReason::InitialClose => write!(f, "initial_close"),
        }
    }
}

/// Persisted position (one `trades` row)
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub id: i64,
    pub token: Address,
    pub network: String,
    pub exchange: String,
    pub status: PositionStatus,
    /// Native per token at entry
    pub entry_price: f64,
    pub highest_price: f64,
    /// Token base units still held
    pub remaining: U256,
    /// Wei spent on the entry
    pub amount_spent: U256,
    /// Wei received from exits so far
    pub amount_received: U256,
    pub tiers_hit: BTreeSet<String>,
    pub close_reason: Option<String>,
    pub tx_hashes: Vec<String>,
    pub opened_at: DateTime<Utc>,
}

/// Data needed to open a position after a confirmed buy
#[derive(Debug, Clone)]
pub struct NewPosition {
    pub token: Address,
    pub network: String,
    pub exchange: String,
    pub entry_price: f64,
    pub token_amount: U256,
    pub amount_spent: U256,
    pub tx_hash: String,
}

/// One confirmed sell, applied to the store as a single keyed transition
#[derive(Debug, Clone, PartialEq)]
pub struct ExitFill {
    pub token: Address,
    pub network: String,
    /// Idempotence key
    pub tx_hash: String,
    /// Remaining size the sell was computed from
    pub previous_remaining: U256,
    pub amount_sold: U256,
    /// Wei received
    pub proceeds: U256,
    pub price: f64,
    pub reason: String,
    /// Take-profit tier marked atomically with the fill
    pub tier_key: Option<String>,
}

impl ExitFill {
    pub fn new_remaining(&self) -> U256 {
        self.previous_remaining.saturating_sub(self.amount_sold)
    }
}

impl Position {
    /// The state transition a confirmed sell applies: remaining size,
    /// proceeds, tx log, tier and (at zero) closure
    pub fn apply_fill(&mut self, fill: &ExitFill) {
        self.remaining = fill.new_remaining();
        self.amount_received = self.amount_received.saturating_add(fill.proceeds);
        self.tx_hashes.push(fill.tx_hash.clone());
        if let Some(key) = &fill.tier_key {
            self.tiers_hit.insert(key.clone());
        }
        if self.remaining.is_zero() {
            self.status = PositionStatus::Closed;
            self.close_reason = Some(fill.reason.clone());
        }
    }
}

/// Result of applying an `ExitFill`
#[derive(Debug, Clone, PartialEq)]
pub enum FillOutcome {
    Applied(Position),
    /// Same tx hash already recorded
    Duplicate,
    /// No active row, or remaining size moved since the fill was computed
    Rejected(String),
}

// ── Transactions ───────────────────────────────────────────────────────

/// Tagged result of a swap submission
#[derive(Debug, Clone, PartialEq)]
pub enum TxOutcome {
    Confirmed {
        tx_hash: String,
        amount_in: U256,
        amount_out: U256,
    },
    Failed {
        reason: String,
    },
}

impl TxOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        TxOutcome::Failed { reason: reason.into() }
    }
}

// ── Tokens and qualification ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: U256,
}

/// A qualified token as persisted in `tokens`
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub address: Address,
    pub network: String,
    pub exchange: String,
    pub discovered_at: DateTime<Utc>,
    pub initial_price: f64,
    pub targets_hit: BTreeSet<String>,
}

/// Pair reserves with the pair's token0
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairReserves {
    pub reserve0: U256,
    pub reserve1: U256,
    pub token0: Address,
}

impl PairReserves {
    /// (token reserve, native reserve) for `token`
    pub fn split_for(&self, token: Address) -> (U256, U256) {
        if self.token0 == token {
            (self.reserve0, self.reserve1)
        } else {
            (self.reserve1, self.reserve0)
        }
    }
}

/// Decoded factory `PairCreated` log
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairCreated {
    pub token0: Address,
    pub token1: Address,
    pub pair: Address,
    pub block_number: Option<u64>,
}

impl PairCreated {
    /// The side that is not the wrapped native token, if exactly one is
    pub fn candidate(&self, wrapped_native: Address) -> Option<Address> {
        if self.token0 == wrapped_native && self.token1 != wrapped_native {
            Some(self.token1)
        } else if self.token1 == wrapped_native && self.token0 != wrapped_native {
            Some(self.token0)
        } else {
            None
        }
    }
}

/// LP share held by one lock platform
#[derive(Debug, Clone, PartialEq)]
pub struct LockShare {
    pub platform: String,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LockReport {
    pub is_locked: bool,
    /// Platform whose share crossed the threshold
    pub platform: Option<String>,
    /// Every platform holding a non-zero share
    pub shares: Vec<LockShare>,
}

/// Why a candidate was dropped
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    NoWrappedSide,
    NoPair,
    TimedOut,
    InsufficientLiquidity { liquidity: f64, required: f64 },
    EmptyReserves,
    Honeypot(String),
    AnalysisFailed(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Rejection::NoWrappedSide => write!(f, "no_wrapped_side"),
            Rejection::NoPair => write!(f, "no_pair"),
            Rejection::TimedOut => write!(f, "timed_out"),
            Rejection::InsufficientLiquidity { liquidity, required } => {
                write!(f, "insufficient_liquidity ({:.4} < {:.4})", liquidity, required)
            }
            Rejection::EmptyReserves => write!(f, "empty_reserves"),
            Rejection::Honeypot(why) => write!(f, "honeypot: {}", why),
            Rejection::AnalysisFailed(why) => write!(f, "analysis_failed: {}", why),
        }
    }
}

/// Everything the lifecycle engine needs from a passed qualification
#[derive(Debug, Clone, PartialEq)]
pub struct QualifiedToken {
    pub token: Address,
    pub pair: Address,
    pub metadata: TokenMetadata,
    /// Native units
    pub native_liquidity: f64,
    /// Token units (decimals applied)
    pub token_liquidity: f64,
    pub lock: LockReport,
    /// Native per token
    pub initial_price: f64,
    /// None when the sell probe was skipped (monitor-only mode)
    pub sellable: Option<bool>,
}

/// Verdict emitted by the qualification pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum QualificationVerdict {
    Pass(QualifiedToken),
    Fail { token: Address, reason: Rejection },
}
