//! Chain Facade (alloy)
//!
//! `ContractFacade` over alloy `sol!` bindings. Reads are single pool
//! operations; swaps are a short sequence of them:
//!
//! 1. gas price (node price x `gas_price_multiplier`) and balance guard
//! 2. allowance check / `approve(router, MAX)` for sells
//! 3. nonce fetched once and pinned, so a resubmission after a transient
//!    failure carries the same nonce
//! 4. submit with legacy pricing, fixed gas limit, deadline now + `deadline`
//! 5. receipt polled every 2s up to `receipt_timeout`
//!
//! Author: AI-Generated
//! Created: 2026-10-16

use super::{decode_pair_created, ContractFacade};
use crate::config::{secs, ExchangeConfig, TradingSettings};
use crate::contracts::{IUniswapV2Factory, IUniswapV2Pair, IUniswapV2Router02, IERC20};
use crate::error::{CallResult, SniperError};
use crate::rpc::{AlloyConnector, EndpointPool};
use crate::types::{PairCreated, PairReserves, TokenMetadata, TxOutcome};
use alloy::eips::BlockId;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{DynProvider, Provider};
use alloy::rpc::types::Filter;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

fn rpc_err<E: std::fmt::Display>(err: E) -> SniperError {
    SniperError::from_display(err)
}

/// Legacy pricing shared by every transaction of one swap
#[derive(Debug, Clone, Copy)]
struct TxParams {
    from: Address,
    gas_price: u128,
    gas_limit: u64,
}

pub struct ChainFacade {
    pool: Arc<EndpointPool<AlloyConnector>>,
    network: String,
    exchange: ExchangeConfig,
    trading: TradingSettings,
    wallet: Option<Address>,
}

impl ChainFacade {
    pub fn new(
        pool: Arc<EndpointPool<AlloyConnector>>,
        network: &str,
        exchange: ExchangeConfig,
        trading: TradingSettings,
        wallet: Option<Address>,
    ) -> Self {
        Self {
            pool,
            network: network.to_string(),
            exchange,
            trading,
            wallet,
        }
    }

    async fn tx_params(&self, from: Address) -> CallResult<TxParams> {
        let node_price: u128 = self
            .pool
            .execute("eth_gasPrice", |p: DynProvider| async move {
                p.get_gas_price().await.map_err(rpc_err)
            })
            .await?;
        let gas_price = (node_price as f64 * self.trading.gas_price_multiplier) as u128;
        Ok(TxParams {
            from,
            gas_price,
            gas_limit: self.trading.gas_limit,
        })
    }

    async fn pending_nonce(&self, from: Address) -> CallResult<u64> {
        self.pool
            .execute("eth_getTransactionCount", move |p: DynProvider| async move {
                p.get_transaction_count(from).pending().await.map_err(rpc_err)
            })
            .await
    }

    fn deadline(&self) -> U256 {
        U256::from(Utc::now().timestamp().max(0) as u64 + self.trading.deadline)
    }

    /// Poll until mined. `Ok(false)` for a reverted transaction.
    async fn wait_for_receipt(&self, hash: B256) -> CallResult<bool> {
        let started = Instant::now();
        let limit = secs(self.trading.receipt_timeout);

        loop {
            let status: Option<bool> = self
                .pool
                .execute("eth_getTransactionReceipt", move |p: DynProvider| async move {
                    p.get_transaction_receipt(hash)
                        .await
                        .map(|receipt| receipt.map(|r| r.status()))
                        .map_err(rpc_err)
                })
                .await?;

            if let Some(success) = status {
                return Ok(success);
            }
            if started.elapsed() >= limit {
                return Err(SniperError::Transient(format!(
                    "no receipt for {:#x} after {:?}",
                    hash, limit
                )));
            }
            sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }

    async fn ensure_allowance(&self, token: Address, amount: U256, params: TxParams) -> CallResult<()> {
        let router = self.exchange.router;
        let owner = params.from;
        let allowance: U256 = self
            .pool
            .execute("allowance", move |p: DynProvider| async move {
                IERC20::new(token, p).allowance(owner, router).call().await.map_err(rpc_err)
            })
            .await?;
        if allowance >= amount {
            return Ok(());
        }

        info!("Approving {} router for {:#x}", self.exchange.name, token);
        let nonce = self.pending_nonce(owner).await?;
        let hash: B256 = self
            .pool
            .execute("approve", move |p: DynProvider| async move {
                let pending = IERC20::new(token, p)
                    .approve(router, U256::MAX)
                    .from(params.from)
                    .nonce(nonce)
                    .gas(params.gas_limit)
                    .gas_price(params.gas_price)
                    .send()
                    .await
                    .map_err(rpc_err)?;
                Ok(*pending.tx_hash())
            })
            .await?;

        if self.wait_for_receipt(hash).await? {
            Ok(())
        } else {
            Err(SniperError::ContractLogic(format!("approve {:#x} reverted", hash)))
        }
    }

    async fn buy(&self, from: Address, token: Address, amount_in: U256, min_out: U256) -> CallResult<TxOutcome> {
        let params = self.tx_params(from).await?;
        let gas_cost = U256::from(params.gas_price) * U256::from(params.gas_limit);
        let balance = self.get_balance_of(from, None).await?;
        if gas_cost + amount_in > balance {
            return Ok(TxOutcome::failed(format!(
                "insufficient balance: need {} wei (incl. gas), have {}",
                gas_cost + amount_in,
                balance
            )));
        }

        let before = self.get_token_balance(token, from).await?;
        let nonce = self.pending_nonce(from).await?;
        let deadline = self.deadline();
        let router = self.exchange.router;
        let path = vec![self.exchange.wrapped_native, token];

        let hash: B256 = self
            .pool
            .execute("swapExactETHForTokens", move |p: DynProvider| {
                let path = path.clone();
                async move {
                    let pending = IUniswapV2Router02::new(router, p)
                        .swapExactETHForTokens(min_out, path, params.from, deadline)
                        .value(amount_in)
                        .from(params.from)
                        .nonce(nonce)
                        .gas(params.gas_limit)
                        .gas_price(params.gas_price)
                        .send()
                        .await
                        .map_err(rpc_err)?;
                    Ok(*pending.tx_hash())
                }
            })
            .await?;
        debug!("Buy submitted on {}: {:#x}", self.network, hash);

        if !self.wait_for_receipt(hash).await? {
            return Ok(TxOutcome::failed(format!("buy {:#x} reverted", hash)));
        }

        let after = self.get_token_balance(token, from).await?;
        Ok(TxOutcome::Confirmed {
            tx_hash: format!("{:#x}", hash),
            amount_in,
            amount_out: after.saturating_sub(before),
        })
    }

    async fn sell(&self, from: Address, token: Address, amount_in: U256, min_out: U256) -> CallResult<TxOutcome> {
        let params = self.tx_params(from).await?;
        self.ensure_allowance(token, amount_in, params).await?;

        let quote = self
            .get_quote(amount_in, vec![token, self.exchange.wrapped_native])
            .await?;
        let expected = quote.last().copied().unwrap_or(U256::ZERO);

        let nonce = self.pending_nonce(from).await?;
        let deadline = self.deadline();
        let router = self.exchange.router;
        let path = vec![token, self.exchange.wrapped_native];

        let hash: B256 = self
            .pool
            .execute("swapExactTokensForETH", move |p: DynProvider| {
                let path = path.clone();
                async move {
                    let pending = IUniswapV2Router02::new(router, p)
                        .swapExactTokensForETH(amount_in, min_out, path, params.from, deadline)
                        .from(params.from)
                        .nonce(nonce)
                        .gas(params.gas_limit)
                        .gas_price(params.gas_price)
                        .send()
                        .await
                        .map_err(rpc_err)?;
                    Ok(*pending.tx_hash())
                }
            })
            .await?;
        debug!("Sell submitted on {}: {:#x}", self.network, hash);

        if !self.wait_for_receipt(hash).await? {
            return Ok(TxOutcome::failed(format!("sell {:#x} reverted", hash)));
        }

        Ok(TxOutcome::Confirmed {
            tx_hash: format!("{:#x}", hash),
            amount_in,
            amount_out: expected,
        })
    }
}

#[async_trait]
impl ContractFacade for ChainFacade {
    fn network(&self) -> &str {
        &self.network
    }

    fn exchange(&self) -> &str {
        &self.exchange.name
    }

    fn wrapped_native(&self) -> Address {
        self.exchange.wrapped_native
    }

    fn wallet_address(&self) -> Option<Address> {
        self.wallet
    }

    async fn get_pair_address(&self, token_a: Address, token_b: Address) -> CallResult<Address> {
        let factory = self.exchange.factory;
        self.pool
            .execute("getPair", move |p: DynProvider| async move {
                IUniswapV2Factory::new(factory, p)
                    .getPair(token_a, token_b)
                    .call()
                    .await
                    .map_err(rpc_err)
            })
            .await
    }

    async fn get_reserves(&self, pair: Address) -> CallResult<PairReserves> {
        self.pool
            .execute("getReserves", move |p: DynProvider| async move {
                let contract = IUniswapV2Pair::new(pair, p);
                let reserves = contract.getReserves().call().await.map_err(rpc_err)?;
                let token0 = contract.token0().call().await.map_err(rpc_err)?;
                Ok(PairReserves {
                    reserve0: U256::from(reserves.reserve0),
                    reserve1: U256::from(reserves.reserve1),
                    token0,
                })
            })
            .await
    }

    async fn get_token_metadata(&self, token: Address) -> CallResult<TokenMetadata> {
        self.pool
            .execute("token metadata", move |p: DynProvider| async move {
                let erc20 = IERC20::new(token, p);
                // Some tokens return bytes32 names; those are not fatal
                let name = erc20.name().call().await.unwrap_or_else(|_| "UNKNOWN".to_string());
                let symbol = erc20.symbol().call().await.unwrap_or_else(|_| "UNKNOWN".to_string());
                let decimals = erc20.decimals().call().await.map_err(rpc_err)?;
                let total_supply = erc20.totalSupply().call().await.map_err(rpc_err)?;
                Ok(TokenMetadata { name, symbol, decimals, total_supply })
            })
            .await
    }

    async fn get_total_supply(&self, token: Address) -> CallResult<U256> {
        self.pool
            .execute("totalSupply", move |p: DynProvider| async move {
                IERC20::new(token, p).totalSupply().call().await.map_err(rpc_err)
            })
            .await
    }

    async fn get_quote(&self, amount_in: U256, path: Vec<Address>) -> CallResult<Vec<U256>> {
        let router = self.exchange.router;
        self.pool
            .execute("getAmountsOut", move |p: DynProvider| {
                let path = path.clone();
                async move {
                    IUniswapV2Router02::new(router, p)
                        .getAmountsOut(amount_in, path)
                        .call()
                        .await
                        .map_err(rpc_err)
                }
            })
            .await
    }

    async fn swap_exact_native_for_tokens(&self, token: Address, amount_in: U256, min_out: U256) -> TxOutcome {
        let Some(from) = self.wallet else {
            return TxOutcome::failed("no wallet configured");
        };
        match self.buy(from, token, amount_in, min_out).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Buy of {:#x} on {}/{} failed: {}", token, self.network, self.exchange.name, e);
                TxOutcome::failed(e.to_string())
            }
        }
    }

    async fn swap_exact_tokens_for_native(&self, token: Address, amount_in: U256, min_out: U256) -> TxOutcome {
        let Some(from) = self.wallet else {
            return TxOutcome::failed("no wallet configured");
        };
        match self.sell(from, token, amount_in, min_out).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Sell of {:#x} on {}/{} failed: {}", token, self.network, self.exchange.name, e);
                TxOutcome::failed(e.to_string())
            }
        }
    }

    async fn get_balance_of(&self, address: Address, block: Option<u64>) -> CallResult<U256> {
        self.pool
            .execute("eth_getBalance", move |p: DynProvider| async move {
                let request = p.get_balance(address);
                let balance = match block {
                    Some(number) => request.block_id(BlockId::number(number)).await,
                    None => request.await,
                };
                balance.map_err(rpc_err)
            })
            .await
    }

    async fn get_token_balance(&self, token: Address, holder: Address) -> CallResult<U256> {
        self.pool
            .execute("balanceOf", move |p: DynProvider| async move {
                IERC20::new(token, p).balanceOf(holder).call().await.map_err(rpc_err)
            })
            .await
    }

    async fn get_chain_height(&self) -> CallResult<u64> {
        self.pool
            .execute("eth_blockNumber", |p: DynProvider| async move {
                p.get_block_number().await.map_err(rpc_err)
            })
            .await
    }

    async fn get_code_size(&self, address: Address) -> CallResult<usize> {
        self.pool
            .execute("eth_getCode", move |p: DynProvider| async move {
                p.get_code_at(address).await.map(|code| code.len()).map_err(rpc_err)
            })
            .await
    }

    async fn get_pair_created_logs(&self, from: u64, to: u64) -> CallResult<Vec<PairCreated>> {
        let filter = Filter::new()
            .address(self.exchange.factory)
            .event_signature(IUniswapV2Factory::PairCreated::SIGNATURE_HASH)
            .from_block(from)
            .to_block(to);

        self.pool
            .execute("eth_getLogs", move |p: DynProvider| {
                let filter = filter.clone();
                async move {
                    let logs = p.get_logs(&filter).await.map_err(rpc_err)?;
                    Ok(logs.iter().filter_map(decode_pair_created).collect::<Vec<_>>())
                }
            })
            .await
    }

    async fn acquire_fresh_session(&self) -> CallResult<String> {
        self.pool.acquire_fresh_session().await
    }
}
