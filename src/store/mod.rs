//! Position Store
//!
//! Durable record of tokens, positions, fills and endpoint health. The core
//! only talks to the `PositionStore` trait; `SqliteStore` is the shipped
//! implementation.
//!
//! Author: AI-Generated
//! Created: 2026-10-16

#[cfg(test)]
pub mod flaky;
pub mod sqlite;

use crate::types::{ExitFill, FillOutcome, LockShare, NewPosition, Position, Token};
use alloy::primitives::{Address, U256};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use sqlite::SqliteStore;

/// One call's result against one endpoint
#[derive(Debug, Clone)]
pub struct EndpointOutcome {
    pub network: String,
    pub url: String,
    pub success: bool,
    pub at: DateTime<Utc>,
    pub error: Option<String>,
}

/// One `trade_history` row
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub trade_id: i64,
    pub action: String,
    pub amount: U256,
    pub price: f64,
    pub proceeds: U256,
    pub tx_hash: String,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// Storage operations used by the pool, the qualification pipeline and the
/// lifecycle engine. Positions are addressed by (network, token).
/// Implementations must serialize read-modify-write per position;
/// `update_remaining` is keyed by the fill's tx hash.
#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn save_token(&self, token: &Token) -> Result<()>;

    async fn save_lock(&self, token: Address, network: &str, share: &LockShare) -> Result<()>;

    /// Open a position after a confirmed buy. Fails if the token already has
    /// one on that network.
    async fn create_position(&self, new: &NewPosition) -> Result<Position>;

    async fn get_active_position(&self, network: &str, token: Address) -> Result<Option<Position>>;

    /// Apply one confirmed sell: remaining size, proceeds, tier, history and
    /// (at zero) closure, all in one transaction
    async fn update_remaining(&self, fill: &ExitFill) -> Result<FillOutcome>;

    async fn mark_tier_hit(&self, network: &str, token: Address, tier_key: &str) -> Result<()>;

    /// Raise the high-water mark; lower prices are ignored
    async fn update_high_water(&self, network: &str, token: Address, price: f64) -> Result<()>;

    /// Close without a fill (forced closes, dead tokens)
    async fn close_position(&self, network: &str, token: Address, reason: &str) -> Result<()>;

    async fn list_active_positions(
        &self,
        network: Option<&str>,
        exchange: Option<&str>,
    ) -> Result<Vec<Position>>;

    async fn list_history(&self, network: &str, token: Address) -> Result<Vec<HistoryEntry>>;

    async fn record_endpoint_outcome(&self, outcome: &EndpointOutcome) -> Result<()>;

    /// URLs that ever succeeded on `network`, most recent first
    async fn list_endpoints_by_recent_success(&self, network: &str) -> Result<Vec<String>>;
}
