// Scripted facade for qualification, lifecycle and discovery tests

use super::ContractFacade;
use crate::error::{CallResult, SniperError};
use crate::types::{
    native_to_wei, scale_units, u256_to_f64, PairCreated, PairReserves, TokenMetadata, TxOutcome,
};
use alloy::primitives::{address, Address, U256};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub const WRAPPED: Address = address!("bb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c");
pub const TOKEN: Address = address!("1111111111111111111111111111111111111111");
pub const PAIR: Address = address!("2222222222222222222222222222222222222222");
pub const WALLET: Address = address!("9999999999999999999999999999999999999999");

#[derive(Debug, Clone, PartialEq)]
pub struct SwapCall {
    pub token: Address,
    pub amount_in: U256,
    pub min_out: U256,
}

pub struct ScriptedFacade {
    pub pair: Mutex<Address>,
    pub decimals: u8,
    /// Native per whole token; `None` makes every quote fail
    pub price: Mutex<Option<f64>>,
    /// Popped one per read, the last entry repeats
    pub reserves: Mutex<VecDeque<PairReserves>>,
    /// Native balance held directly by the pair
    pub pair_native_balance: Mutex<U256>,
    /// LP token balances by holder
    pub lp_balances: Mutex<HashMap<Address, U256>>,
    pub lp_supply: U256,
    pub native_balance: Mutex<U256>,
    pub code_size: Mutex<usize>,
    pub height: AtomicU64,
    pub logs: Mutex<Vec<PairCreated>>,
    pub fail_buys: Mutex<bool>,
    pub fail_sells: Mutex<bool>,
    /// Chain height and log reads fail with endpoint exhaustion
    pub fail_reads: Mutex<bool>,
    pub buys: Mutex<Vec<SwapCall>>,
    pub sells: Mutex<Vec<SwapCall>>,
    tx_counter: AtomicU64,
}

impl ScriptedFacade {
    pub fn new() -> Self {
        Self {
            pair: Mutex::new(PAIR),
            decimals: 18,
            price: Mutex::new(Some(1.0)),
            reserves: Mutex::new(VecDeque::new()),
            pair_native_balance: Mutex::new(U256::ZERO),
            lp_balances: Mutex::new(HashMap::new()),
            lp_supply: U256::from(1_000u64),
            native_balance: Mutex::new(native_to_wei(10.0)),
            code_size: Mutex::new(1_024),
            height: AtomicU64::new(100),
            logs: Mutex::new(Vec::new()),
            fail_buys: Mutex::new(false),
            fail_sells: Mutex::new(false),
            fail_reads: Mutex::new(false),
            buys: Mutex::new(Vec::new()),
            sells: Mutex::new(Vec::new()),
            tx_counter: AtomicU64::new(0),
        }
    }

    /// Reserves with TOKEN as token0, both sides in whole units
    pub fn push_reserves(&self, token_units: f64, native_units: f64) {
        self.reserves.lock().unwrap().push_back(PairReserves {
            reserve0: native_to_wei(token_units),
            reserve1: native_to_wei(native_units),
            token0: TOKEN,
        });
    }

    pub fn set_price(&self, price: Option<f64>) {
        *self.price.lock().unwrap() = price;
    }

    fn next_hash(&self) -> String {
        let n = self.tx_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("0x{:064x}", n)
    }

    fn exhausted() -> SniperError {
        SniperError::Exhausted {
            network: "bsc".to_string(),
            attempts: 2,
            last_error: "connection refused".to_string(),
        }
    }

    fn current_price(&self) -> CallResult<f64> {
        self.price.lock().unwrap().ok_or_else(Self::exhausted)
    }

    fn check_reads(&self) -> CallResult<()> {
        if *self.fail_reads.lock().unwrap() {
            return Err(Self::exhausted());
        }
        Ok(())
    }
}

#[async_trait]
impl ContractFacade for ScriptedFacade {
    fn network(&self) -> &str {
        "bsc"
    }

    fn exchange(&self) -> &str {
        "pancakeswap"
    }

    fn wrapped_native(&self) -> Address {
        WRAPPED
    }

    fn wallet_address(&self) -> Option<Address> {
        Some(WALLET)
    }

    async fn get_pair_address(&self, _a: Address, _b: Address) -> CallResult<Address> {
        Ok(*self.pair.lock().unwrap())
    }

    async fn get_reserves(&self, _pair: Address) -> CallResult<PairReserves> {
        let mut script = self.reserves.lock().unwrap();
        let next = if script.len() > 1 { script.pop_front() } else { script.front().copied() };
        next.ok_or_else(|| SniperError::Fatal("no reserves scripted".to_string()))
    }

    async fn get_token_metadata(&self, _token: Address) -> CallResult<TokenMetadata> {
        Ok(TokenMetadata {
            name: "Test Token".to_string(),
            symbol: "TEST".to_string(),
            decimals: self.decimals,
            total_supply: native_to_wei(1_000_000.0),
        })
    }

    async fn get_total_supply(&self, _token: Address) -> CallResult<U256> {
        Ok(self.lp_supply)
    }

    async fn get_quote(&self, amount_in: U256, path: Vec<Address>) -> CallResult<Vec<U256>> {
        let price = self.current_price()?;
        let out = if path.first() == Some(&WRAPPED) {
            // native -> token
            let tokens = u256_to_f64(amount_in) / 1e18 / price;
            U256::from((tokens * 10f64.powi(self.decimals as i32)) as u128)
        } else {
            native_to_wei(scale_units(amount_in, self.decimals) * price)
        };
        Ok(vec![amount_in, out])
    }

    async fn swap_exact_native_for_tokens(&self, token: Address, amount_in: U256, min_out: U256) -> TxOutcome {
        self.buys.lock().unwrap().push(SwapCall { token, amount_in, min_out });
        if *self.fail_buys.lock().unwrap() {
            return TxOutcome::failed("execution reverted");
        }
        let amount_out = match self.get_quote(amount_in, vec![WRAPPED, token]).await {
            Ok(q) => q[1],
            Err(e) => return TxOutcome::failed(e.to_string()),
        };
        TxOutcome::Confirmed { tx_hash: self.next_hash(), amount_in, amount_out }
    }

    async fn swap_exact_tokens_for_native(&self, token: Address, amount_in: U256, min_out: U256) -> TxOutcome {
        self.sells.lock().unwrap().push(SwapCall { token, amount_in, min_out });
        if *self.fail_sells.lock().unwrap() {
            return TxOutcome::failed("execution reverted: TRANSFER_FAILED");
        }
        let amount_out = match self.get_quote(amount_in, vec![token, WRAPPED]).await {
            Ok(q) => q[1],
            Err(e) => return TxOutcome::failed(e.to_string()),
        };
        TxOutcome::Confirmed { tx_hash: self.next_hash(), amount_in, amount_out }
    }

    async fn get_balance_of(&self, address: Address, _block: Option<u64>) -> CallResult<U256> {
        if address == *self.pair.lock().unwrap() {
            return Ok(*self.pair_native_balance.lock().unwrap());
        }
        Ok(*self.native_balance.lock().unwrap())
    }

    async fn get_token_balance(&self, _token: Address, holder: Address) -> CallResult<U256> {
        Ok(self.lp_balances.lock().unwrap().get(&holder).copied().unwrap_or(U256::ZERO))
    }

    async fn get_chain_height(&self) -> CallResult<u64> {
        self.check_reads()?;
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn get_code_size(&self, _address: Address) -> CallResult<usize> {
        Ok(*self.code_size.lock().unwrap())
    }

    async fn get_pair_created_logs(&self, from: u64, to: u64) -> CallResult<Vec<PairCreated>> {
        self.check_reads()?;
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.block_number.map_or(true, |b| b >= from && b <= to))
            .copied()
            .collect())
    }

    async fn acquire_fresh_session(&self) -> CallResult<String> {
        Ok("https://scripted".to_string())
    }
}
