//! DEX Pair Sniper Library
//!
//! Watches DEX factories for new pairs, qualifies the new token (stable
//! liquidity, lock detection, sell probe) and manages each resulting
//! position through tiered take-profit, stop-loss, trailing stop and a
//! grace-period check. Every chain call goes through a per-group endpoint
//! pool that rotates, backs off and remembers which endpoints work.
//!
//! Author: AI-Generated
//! Created: 2026-10-16

pub mod config;
pub mod contracts;
pub mod discovery;
pub mod error;
pub mod facade;
pub mod lifecycle;
pub mod qualification;
pub mod rpc;
pub mod store;
pub mod tasks;
pub mod types;

// Re-export commonly used types
pub use config::SniperConfig;
pub use error::{CallResult, SniperError};
pub use facade::{ChainFacade, ContractFacade};
pub use store::{PositionStore, SqliteStore};
pub use types::{CloseReason, ExitRuleSet, Position, QualificationVerdict, TakeProfitTier};
