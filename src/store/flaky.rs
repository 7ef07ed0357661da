// Store wrapper that fails a scripted number of writes, for lifecycle tests

use super::{EndpointOutcome, HistoryEntry, PositionStore, SqliteStore};
use crate::types::{ExitFill, FillOutcome, LockShare, NewPosition, Position, Token};
use alloy::primitives::Address;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};

pub struct FlakyStore {
    pub inner: SqliteStore,
    /// `update_remaining` calls left to fail
    pub fill_failures: AtomicU32,
    /// `create_position` calls left to fail
    pub create_failures: AtomicU32,
}

impl FlakyStore {
    pub async fn new(fill_failures: u32, create_failures: u32) -> Self {
        Self {
            inner: SqliteStore::in_memory().await.unwrap(),
            fill_failures: AtomicU32::new(fill_failures),
            create_failures: AtomicU32::new(create_failures),
        }
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl PositionStore for FlakyStore {
    async fn save_token(&self, token: &Token) -> Result<()> {
        self.inner.save_token(token).await
    }

    async fn save_lock(&self, token: Address, network: &str, share: &LockShare) -> Result<()> {
        self.inner.save_lock(token, network, share).await
    }

    async fn create_position(&self, new: &NewPosition) -> Result<Position> {
        if Self::take_failure(&self.create_failures) {
            bail!("database is locked");
        }
        self.inner.create_position(new).await
    }

    async fn get_active_position(&self, network: &str, token: Address) -> Result<Option<Position>> {
        self.inner.get_active_position(network, token).await
    }

    async fn update_remaining(&self, fill: &ExitFill) -> Result<FillOutcome> {
        if Self::take_failure(&self.fill_failures) {
            bail!("database is locked");
        }
        self.inner.update_remaining(fill).await
    }

    async fn mark_tier_hit(&self, network: &str, token: Address, tier_key: &str) -> Result<()> {
        self.inner.mark_tier_hit(network, token, tier_key).await
    }

    async fn update_high_water(&self, network: &str, token: Address, price: f64) -> Result<()> {
        self.inner.update_high_water(network, token, price).await
    }

    async fn close_position(&self, network: &str, token: Address, reason: &str) -> Result<()> {
        self.inner.close_position(network, token, reason).await
    }

    async fn list_active_positions(
        &self,
        network: Option<&str>,
        exchange: Option<&str>,
    ) -> Result<Vec<Position>> {
        self.inner.list_active_positions(network, exchange).await
    }

    async fn list_history(&self, network: &str, token: Address) -> Result<Vec<HistoryEntry>> {
        self.inner.list_history(network, token).await
    }

    async fn record_endpoint_outcome(&self, outcome: &EndpointOutcome) -> Result<()> {
        self.inner.record_endpoint_outcome(outcome).await
    }

    async fn list_endpoints_by_recent_success(&self, network: &str) -> Result<Vec<String>> {
        self.inner.list_endpoints_by_recent_success(network).await
    }
}
