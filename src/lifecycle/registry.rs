//! Live Position Registry
//!
//! Tokens that currently have a lifecycle task, keyed by (network, token
//! address). A token can only be claimed once at a time per network, so two
//! exchanges on one chain (or two events for the same pair) never run
//! competing tasks for one position. The same address deployed on another
//! chain is a different token.
//!
//! Author: AI-Generated
//! Created: 2026-10-16

use alloy::primitives::Address;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct LiveRegistry {
    /// (network, token) -> owning exchange
    live: Arc<DashMap<(String, Address), String>>,
}

impl LiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `token` on `network` for `exchange`. False if another task
    /// already owns it.
    pub fn try_claim(&self, network: &str, token: Address, exchange: &str) -> bool {
        match self.live.entry((network.to_string(), token)) {
            Entry::Occupied(owner) => {
                debug!("{:#x} already live on {}/{}", token, network, owner.get());
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(exchange.to_string());
                true
            }
        }
    }

    pub fn release(&self, network: &str, token: Address) {
        self.live.remove(&(network.to_string(), token));
    }

    pub fn is_live(&self, network: &str, token: Address) -> bool {
        self.live.contains_key(&(network.to_string(), token))
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}
