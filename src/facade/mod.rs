//! Contract Facade
//!
//! The narrow set of chain operations the sniper needs for one
//! (network, exchange) pair: factory/pair/router reads, the two swap
//! directions, balances and the `PairCreated` log decoder.
//!
//! `ChainFacade` is the alloy implementation; every call in it is routed
//! through the network's `EndpointPool`.
//!
//! Author: AI-Generated
//! Created: 2026-10-16

pub mod chain;
#[cfg(test)]
pub mod mock;

use crate::contracts::IUniswapV2Factory;
use crate::error::CallResult;
use crate::types::{PairCreated, PairReserves, TokenMetadata, TxOutcome};
use alloy::primitives::{Address, U256};
use alloy::rpc::types::Log;
use async_trait::async_trait;

pub use chain::ChainFacade;

#[async_trait]
pub trait ContractFacade: Send + Sync {
    fn network(&self) -> &str;

    fn exchange(&self) -> &str;

    /// Wrapped native token of this exchange (WBNB, WETH, WMATIC)
    fn wrapped_native(&self) -> Address;

    /// Trading wallet, if one is configured
    fn wallet_address(&self) -> Option<Address>;

    async fn get_pair_address(&self, token_a: Address, token_b: Address) -> CallResult<Address>;

    async fn get_reserves(&self, pair: Address) -> CallResult<PairReserves>;

    async fn get_token_metadata(&self, token: Address) -> CallResult<TokenMetadata>;

    async fn get_total_supply(&self, token: Address) -> CallResult<U256>;

    /// Router `getAmountsOut`
    async fn get_quote(&self, amount_in: U256, path: Vec<Address>) -> CallResult<Vec<U256>>;

    /// Buy `token` with `amount_in` wei. Reverts, timeouts and guards come
    /// back as `TxOutcome::Failed`, never as errors.
    async fn swap_exact_native_for_tokens(&self, token: Address, amount_in: U256, min_out: U256) -> TxOutcome;

    /// Sell `amount_in` base units of `token` for native
    async fn swap_exact_tokens_for_native(&self, token: Address, amount_in: U256, min_out: U256) -> TxOutcome;

    /// Native balance, optionally at a historical block
    async fn get_balance_of(&self, address: Address, block: Option<u64>) -> CallResult<U256>;

    async fn get_token_balance(&self, token: Address, holder: Address) -> CallResult<U256>;

    async fn get_chain_height(&self) -> CallResult<u64>;

    /// Deployed bytecode length; 0 means no contract at `address`
    async fn get_code_size(&self, address: Address) -> CallResult<usize>;

    /// Decoded factory `PairCreated` events in `[from, to]`
    async fn get_pair_created_logs(&self, from: u64, to: u64) -> CallResult<Vec<PairCreated>>;

    /// Blocking re-resolution of the underlying endpoint session
    async fn acquire_fresh_session(&self) -> CallResult<String>;
}

/// Decode a factory `PairCreated` log; `None` for anything else
pub fn decode_pair_created(log: &Log) -> Option<PairCreated> {
    let decoded = log.log_decode::<IUniswapV2Factory::PairCreated>().ok()?;
    let event = decoded.inner.data;
    Some(PairCreated {
        token0: event.token0,
        token1: event.token1,
        pair: event.pair,
        block_number: log.block_number,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, LogData};
    use alloy::sol_types::SolEvent;

    #[test]
    fn test_decode_pair_created() {
        let factory = address!("cA143Ce32Fe78f1f7019d7d551a6402fC5350c73");
        let token0 = address!("1111111111111111111111111111111111111111");
        let token1 = address!("bb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c");
        let pair = address!("3333333333333333333333333333333333333333");

        let event = IUniswapV2Factory::PairCreated {
            token0,
            token1,
            pair,
            pairIndex: U256::from(1_234),
        };
        let log = Log {
            inner: alloy::primitives::Log { address: factory, data: event.encode_log_data() },
            block_number: Some(40_000_000),
            ..Default::default()
        };

        let decoded = decode_pair_created(&log).unwrap();
        assert_eq!(decoded.token0, token0);
        assert_eq!(decoded.token1, token1);
        assert_eq!(decoded.pair, pair);
        assert_eq!(decoded.block_number, Some(40_000_000));
    }

    #[test]
    fn test_decode_ignores_other_events() {
        let log = Log {
            inner: alloy::primitives::Log {
                address: Address::ZERO,
                data: LogData::new_unchecked(vec![], Default::default()),
            },
            ..Default::default()
        };
        assert!(decode_pair_created(&log).is_none());
    }
}
