//! Configuration management
//!
//! Tunables come from a TOML file (`config/sniper.toml`), secrets and a few
//! overrides from `.env`. The result is one immutable `SniperConfig` that is
//! handed to every component at construction.
//!
//! Author: AI-Generated
//! Created: 2026-10-16

use crate::error::SniperError;
use crate::types::{ExitRuleSet, TakeProfitTier};
use alloy::primitives::Address;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Seconds (fractional allowed) to Duration; negative/NaN collapse to zero
pub fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}

// ── Top level ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SniperConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub endpoints: EndpointSettings,
    #[serde(default)]
    pub qualification: QualificationSettings,
    #[serde(default)]
    pub trading: TradingSettings,
    #[serde(default)]
    pub exit: ExitSettings,
    #[serde(default)]
    pub discovery: DiscoverySettings,
    #[serde(rename = "network", default)]
    pub networks: Vec<NetworkConfig>,
    /// Loaded from PRIVATE_KEY, never from the file
    #[serde(skip)]
    pub private_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Empty = every configured network
    #[serde(default)]
    pub active_networks: Vec<String>,
}

fn default_database_path() -> String { "sqlite://sniper.db".to_string() }
fn default_log_level() -> String { "info".to_string() }

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            log_level: default_log_level(),
            active_networks: Vec::new(),
        }
    }
}

// ── Endpoint pool ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointSettings {
    /// Fixed wait after rotating, also the backoff base
    #[serde(default = "default_rotation_delay")]
    pub rotation_delay: f64,
    /// 0 = one attempt per configured endpoint
    #[serde(default)]
    pub max_retries_per_call: usize,
    #[serde(default = "default_call_timeout")]
    pub call_timeout: f64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout: f64,
    #[serde(default = "default_session_backoff_base")]
    pub session_backoff_base: f64,
    #[serde(default = "default_session_backoff_cap")]
    pub session_backoff_cap: f64,
}

fn default_rotation_delay() -> f64 { 3.0 }
fn default_call_timeout() -> f64 { 30.0 }
fn default_probe_timeout() -> f64 { 20.0 }
fn default_session_backoff_base() -> f64 { 10.0 }
fn default_session_backoff_cap() -> f64 { 60.0 }

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            rotation_delay: default_rotation_delay(),
            max_retries_per_call: 0,
            call_timeout: default_call_timeout(),
            probe_timeout: default_probe_timeout(),
            session_backoff_base: default_session_backoff_base(),
            session_backoff_cap: default_session_backoff_cap(),
        }
    }
}

// ── Qualification ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct QualificationSettings {
    /// Absolute native-unit change still counted as stable
    #[serde(default = "default_stability_tolerance")]
    pub stability_tolerance: f64,
    #[serde(default = "default_required_stable_samples")]
    pub required_stable_samples: u32,
    #[serde(default = "default_observation_window")]
    pub observation_window: f64,
    #[serde(default = "default_sample_interval")]
    pub sample_interval: f64,
    #[serde(default = "default_lock_threshold")]
    pub lock_threshold_percent: f64,
    /// Native units spent on the sell-ability probe
    #[serde(default = "default_probe_amount")]
    pub probe_amount: f64,
}

fn default_stability_tolerance() -> f64 { 0.1 }
fn default_required_stable_samples() -> u32 { 3 }
fn default_observation_window() -> f64 { 30.0 }
fn default_sample_interval() -> f64 { 1.0 }
fn default_lock_threshold() -> f64 { 80.0 }
fn default_probe_amount() -> f64 { 0.0005 }

impl Default for QualificationSettings {
    fn default() -> Self {
        Self {
            stability_tolerance: default_stability_tolerance(),
            required_stable_samples: default_required_stable_samples(),
            observation_window: default_observation_window(),
            sample_interval: default_sample_interval(),
            lock_threshold_percent: default_lock_threshold(),
            probe_amount: default_probe_amount(),
        }
    }
}

// ── Trading ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct TradingSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Fraction of the quote we are willing to give up (0.03 = accept 97%)
    #[serde(default = "default_slippage")]
    pub slippage_tolerance: f64,
    #[serde(default = "default_gas_multiplier")]
    pub gas_price_multiplier: f64,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    /// Swap deadline, seconds from submission
    #[serde(default = "default_deadline")]
    pub deadline: u64,
    /// Percent of the native balance used when liquidity is locked
    #[serde(default = "default_balance_percent")]
    pub balance_percent: f64,
    /// Notional used when liquidity is not locked
    #[serde(default = "default_usd_notional")]
    pub usd_notional: f64,
    /// Substituted for a computed zero buy amount
    #[serde(default = "default_zero_amount_fallback")]
    pub zero_amount_fallback: f64,
    #[serde(default = "default_receipt_timeout")]
    pub receipt_timeout: f64,
}

fn default_true() -> bool { true }
fn default_slippage() -> f64 { 0.03 }
fn default_gas_multiplier() -> f64 { 1.1 }
fn default_gas_limit() -> u64 { 500_000 }
fn default_deadline() -> u64 { 60 }
fn default_balance_percent() -> f64 { 10.0 }
fn default_usd_notional() -> f64 { 1.0 }
fn default_zero_amount_fallback() -> f64 { 0.0006 }
fn default_receipt_timeout() -> f64 { 120.0 }

impl Default for TradingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            slippage_tolerance: default_slippage(),
            gas_price_multiplier: default_gas_multiplier(),
            gas_limit: default_gas_limit(),
            deadline: default_deadline(),
            balance_percent: default_balance_percent(),
            usd_notional: default_usd_notional(),
            zero_amount_fallback: default_zero_amount_fallback(),
            receipt_timeout: default_receipt_timeout(),
        }
    }
}

// ── Exit rules ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ExitSettings {
    #[serde(default = "default_stop_loss")]
    pub stop_loss_ratio: f64,
    #[serde(default = "default_tiers")]
    pub take_profit_tiers: Vec<TakeProfitTier>,
    #[serde(default = "default_true")]
    pub trailing_stop_enabled: bool,
    #[serde(default = "default_trailing_percent")]
    pub trailing_stop_percent: f64,
    #[serde(default = "default_grace_period")]
    pub grace_period: u64,
    #[serde(default = "default_grace_target")]
    pub grace_target_multiplier: f64,
    #[serde(default = "default_max_price_misses")]
    pub max_price_misses: u32,
    /// Per-position price polling
    #[serde(default = "default_position_polling")]
    pub polling_interval: f64,
}

fn default_stop_loss() -> f64 { 0.8 }
fn default_tiers() -> Vec<TakeProfitTier> {
    vec![
        TakeProfitTier { multiplier: 2.0, percent: 50.0 },
        TakeProfitTier { multiplier: 3.0, percent: 25.0 },
        TakeProfitTier { multiplier: 4.0, percent: 25.0 },
    ]
}
fn default_trailing_percent() -> f64 { 20.0 }
fn default_grace_period() -> u64 { 300 }
fn default_grace_target() -> f64 { 2.0 }
fn default_max_price_misses() -> u32 { 3 }
fn default_position_polling() -> f64 { 2.0 }

impl Default for ExitSettings {
    fn default() -> Self {
        Self {
            stop_loss_ratio: default_stop_loss(),
            take_profit_tiers: default_tiers(),
            trailing_stop_enabled: true,
            trailing_stop_percent: default_trailing_percent(),
            grace_period: default_grace_period(),
            grace_target_multiplier: default_grace_target(),
            max_price_misses: default_max_price_misses(),
            polling_interval: default_position_polling(),
        }
    }
}

impl ExitSettings {
    pub fn rule_set(&self) -> ExitRuleSet {
        ExitRuleSet::new(
            self.stop_loss_ratio,
            self.take_profit_tiers.clone(),
            self.trailing_stop_enabled,
            self.trailing_stop_percent,
            self.grace_period,
            self.grace_target_multiplier,
        )
    }
}

// ── Discovery ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverySettings {
    #[serde(default = "default_discovery_polling")]
    pub polling_interval: f64,
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
}

fn default_discovery_polling() -> f64 { 15.0 }
fn default_max_retry_attempts() -> u32 { 2 }

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            polling_interval: default_discovery_polling(),
            max_retry_attempts: default_max_retry_attempts(),
        }
    }
}

// ── Networks ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub chain_id: u64,
    pub currency: String,
    pub rpc_urls: Vec<String>,
    /// Native units of pair liquidity required to qualify
    pub min_liquidity: f64,
    /// platform name -> lock contract
    #[serde(default)]
    pub lock_contracts: BTreeMap<String, Address>,
    #[serde(rename = "exchange", default)]
    pub exchanges: Vec<ExchangeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    pub name: String,
    pub factory: Address,
    pub router: Address,
    pub wrapped_native: Address,
}

impl SniperConfig {
    /// Parse a TOML file without touching the environment
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| "Failed to parse TOML configuration")?;

        Ok(config)
    }

    /// Load the file and apply `.env` overrides. Callers apply their own
    /// overrides on top and then `validate()`.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = Self::load(path)?;

        if let Ok(list) = std::env::var("ACTIVE_NETWORKS") {
            config.general.active_networks = split_list(&list);
        }
        if let Ok(db) = std::env::var("DATABASE_PATH") {
            config.general.database_path = db;
        }
        config.private_key = std::env::var("PRIVATE_KEY")
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        Ok(config)
    }

    /// Networks selected by `general.active_networks` (all when empty)
    pub fn active_networks(&self) -> Vec<&NetworkConfig> {
        self.networks
            .iter()
            .filter(|n| {
                self.general.active_networks.is_empty()
                    || self.general.active_networks.iter().any(|a| a.eq_ignore_ascii_case(&n.name))
            })
            .collect()
    }

    /// Startup checks; any failure here is fatal
    pub fn validate(&self) -> std::result::Result<(), SniperError> {
        let active = self.active_networks();
        if active.is_empty() {
            return Err(SniperError::Configuration("no active networks configured".to_string()));
        }
        for network in &active {
            if network.rpc_urls.is_empty() {
                return Err(SniperError::Configuration(format!(
                    "network {} has no rpc_urls",
                    network.name
                )));
            }
            if network.exchanges.is_empty() {
                return Err(SniperError::Configuration(format!(
                    "network {} has no exchanges",
                    network.name
                )));
            }
        }

        let exit = &self.exit;
        if !(exit.stop_loss_ratio > 0.0 && exit.stop_loss_ratio < 1.0) {
            return Err(SniperError::Configuration(format!(
                "stop_loss_ratio must be in (0, 1), got {}",
                exit.stop_loss_ratio
            )));
        }
        for tier in &exit.take_profit_tiers {
            if tier.multiplier <= 1.0 || tier.percent <= 0.0 || tier.percent > 100.0 {
                return Err(SniperError::Configuration(format!(
                    "invalid take-profit tier {}x / {}%",
                    tier.multiplier, tier.percent
                )));
            }
        }
        if !(0.0..1.0).contains(&self.trading.slippage_tolerance) {
            return Err(SniperError::Configuration(format!(
                "slippage_tolerance must be in [0, 1), got {}",
                self.trading.slippage_tolerance
            )));
        }
        if self.trading.enabled && self.private_key.is_none() {
            return Err(SniperError::Configuration(
                "PRIVATE_KEY not set (required when trading is enabled)".to_string(),
            ));
        }
        Ok(())
    }
}

/// Comma-separated list, trimmed and lowercased
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[general]
database_path = "sqlite://test.db"

[endpoints]
rotation_delay = 1.5

[exit]
stop_loss_ratio = 0.75
take_profit_tiers = [
    { multiplier = 3.0, percent = 25.0 },
    { multiplier = 2.0, percent = 50.0 },
]

[[network]]
name = "bsc"
chain_id = 56
currency = "BNB"
rpc_urls = ["https://bsc.publicnode.com", "https://1rpc.io/bnb"]
min_liquidity = 50.0

[network.lock_contracts]
unicrypt = "0xC765bddB93b0D1c1A88282BA0fa6B2d00E3e0c83"

[[network.exchange]]
name = "pancakeswap"
factory = "0xcA143Ce32Fe78f1f7019d7d551a6402fC5350c73"
router = "0x10ED43C718714eb63d5aA57B78B54704E256024E"
wrapped_native = "0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c"

[[network]]
name = "ethereum"
chain_id = 1
currency = "ETH"
rpc_urls = ["https://eth.llamarpc.com"]
min_liquidity = 10.0

[[network.exchange]]
name = "uniswap"
factory = "0x5C69bEe701ef814a2B6a3EDD4B1652CB9cc5aA6f"
router = "0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D"
wrapped_native = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"
"#;

    #[test]
    fn test_parse_toml() {
        let config: SniperConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.networks.len(), 2);
        assert_eq!(config.networks[0].exchanges[0].name, "pancakeswap");
        assert_eq!(config.networks[0].lock_contracts.len(), 1);
        assert_eq!(config.endpoints.rotation_delay, 1.5);
        // Untouched sections fall back to defaults
        assert_eq!(config.qualification.required_stable_samples, 3);
        assert_eq!(config.discovery.max_retry_attempts, 2);
        assert_eq!(config.exit.grace_period, 300);
    }

    #[test]
    fn test_rule_set_sorted() {
        let config: SniperConfig = toml::from_str(SAMPLE).unwrap();
        let rules = config.exit.rule_set();
        assert_eq!(rules.stop_loss_ratio, 0.75);
        assert_eq!(rules.take_profit_tiers[0].multiplier, 2.0);
        assert_eq!(rules.take_profit_tiers[1].multiplier, 3.0);
    }

    #[test]
    fn test_active_network_filter() {
        let mut config: SniperConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.active_networks().len(), 2);
        config.general.active_networks = vec!["BSC".to_string()];
        let active = config.active_networks();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "bsc");
    }

    #[test]
    fn test_validate_requires_private_key_when_trading() {
        let mut config: SniperConfig = toml::from_str(SAMPLE).unwrap();
        assert!(matches!(config.validate(), Err(SniperError::Configuration(_))));

        config.private_key = Some("0xabc".to_string());
        assert!(config.validate().is_ok());

        config.private_key = None;
        config.trading.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_tier() {
        let mut config: SniperConfig = toml::from_str(SAMPLE).unwrap();
        config.trading.enabled = false;
        config.exit.take_profit_tiers.push(TakeProfitTier { multiplier: 0.5, percent: 10.0 });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(" bsc, Ethereum ,,"), vec!["bsc", "ethereum"]);
    }

    #[test]
    fn test_secs() {
        assert_eq!(secs(1.5), Duration::from_millis(1500));
        assert_eq!(secs(-1.0), Duration::ZERO);
    }
}
