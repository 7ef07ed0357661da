//! Token Qualification Pipeline
//!
//! discovered → sampling → {qualified | rejected | timed-out}
//!
//! A candidate from a `PairCreated` event is the side that is not the
//! wrapped native token. Its pair is sampled at `sample_interval` until
//! liquidity is both above `min_liquidity` and stable for
//! `required_stable_samples` consecutive samples, or the observation window
//! runs out. A qualified pair is then analyzed (metadata, price, LP lock)
//! and, when trading is live, probed for sell-ability with a tiny real
//! round trip.
//!
//! Endpoint exhaustion aborts the run (`Err`); every other problem is a
//! `QualificationVerdict::Fail` with an explicit reason.
//!
//! Author: AI-Generated
//! Created: 2026-10-16

pub mod analysis;
pub mod honeypot;
pub mod sampler;

use crate::config::{secs, NetworkConfig, QualificationSettings};
use crate::error::{CallResult, SniperError};
use crate::facade::ContractFacade;
use crate::store::PositionStore;
use crate::types::{
    native_to_wei, PairCreated, QualificationVerdict, QualifiedToken, Rejection, Token,
};
use alloy::primitives::Address;
use analysis::{analyze_pair, detect_lock, sample_liquidity};
use chrono::Utc;
use sampler::{LiquiditySampler, SampleVerdict};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

pub struct QualificationPipeline {
    facade: Arc<dyn ContractFacade>,
    store: Arc<dyn PositionStore>,
    settings: QualificationSettings,
    min_liquidity: f64,
    lock_contracts: BTreeMap<String, Address>,
    slippage: f64,
    /// Off in monitor-only mode: no probe trade is sent
    probe_enabled: bool,
}

impl QualificationPipeline {
    pub fn new(
        facade: Arc<dyn ContractFacade>,
        store: Arc<dyn PositionStore>,
        settings: QualificationSettings,
        network: &NetworkConfig,
        slippage: f64,
        probe_enabled: bool,
    ) -> Self {
        Self {
            facade,
            store,
            settings,
            min_liquidity: network.min_liquidity,
            lock_contracts: network.lock_contracts.clone(),
            slippage,
            probe_enabled,
        }
    }

    /// Qualify the non-wrapped side of a `PairCreated` event
    pub async fn qualify_event(&self, event: &PairCreated) -> CallResult<QualificationVerdict> {
        match event.candidate(self.facade.wrapped_native()) {
            Some(token) => self.qualify(token).await,
            None => Ok(QualificationVerdict::Fail {
                token: event.token0,
                reason: Rejection::NoWrappedSide,
            }),
        }
    }

    pub async fn qualify(&self, token: Address) -> CallResult<QualificationVerdict> {
        let facade = &*self.facade;
        info!("🔍 Qualifying {:#x} on {}/{}", token, facade.network(), facade.exchange());

        let pair = match facade.get_pair_address(token, facade.wrapped_native()).await {
            Ok(pair) if pair == Address::ZERO => return Ok(reject(token, Rejection::NoPair)),
            Ok(pair) => pair,
            Err(e) => return fail_or_abort(token, e),
        };

        let Some(liquidity) = self.sample_until_stable(token, pair).await? else {
            return Ok(reject(token, Rejection::TimedOut));
        };
        debug!("{:#x} stable at {:.4} native", token, liquidity);

        let analysis = match analyze_pair(facade, token, pair).await {
            Ok(Ok(analysis)) => analysis,
            Ok(Err(rejection)) => return Ok(reject(token, rejection)),
            Err(e) => return fail_or_abort(token, e),
        };
        if analysis.native_liquidity < self.min_liquidity {
            return Ok(reject(
                token,
                Rejection::InsufficientLiquidity {
                    liquidity: analysis.native_liquidity,
                    required: self.min_liquidity,
                },
            ));
        }

        let lock = match detect_lock(facade, pair, &self.lock_contracts, self.settings.lock_threshold_percent).await {
            Ok(lock) => lock,
            Err(e) => return fail_or_abort(token, e),
        };

        let sellable = if self.probe_enabled {
            let amount = native_to_wei(self.settings.probe_amount);
            match honeypot::probe_sellability(facade, token, amount, self.slippage).await {
                Ok(()) => Some(true),
                Err(why) => return Ok(reject(token, Rejection::Honeypot(why))),
            }
        } else {
            None
        };

        let qualified = QualifiedToken {
            token,
            pair,
            metadata: analysis.metadata,
            native_liquidity: analysis.native_liquidity,
            token_liquidity: analysis.token_liquidity,
            lock,
            initial_price: analysis.initial_price,
            sellable,
        };
        self.record(&qualified).await;

        info!(
            "✅ {} ({:#x}) qualified: {:.4} native liquidity, price {:.10}, locked={}",
            qualified.metadata.symbol,
            token,
            qualified.native_liquidity,
            qualified.initial_price,
            qualified.lock.is_locked
        );
        Ok(QualificationVerdict::Pass(qualified))
    }

    /// `Some(liquidity)` once qualified, `None` when the window closes first
    async fn sample_until_stable(&self, token: Address, pair: Address) -> CallResult<Option<f64>> {
        let mut sampler = LiquiditySampler::new(
            self.min_liquidity,
            self.settings.stability_tolerance,
            self.settings.required_stable_samples,
        );
        let deadline = Instant::now() + secs(self.settings.observation_window);
        let interval = secs(self.settings.sample_interval);

        loop {
            match sample_liquidity(&*self.facade, token, pair).await {
                Ok(liquidity) => match sampler.observe(liquidity) {
                    SampleVerdict::Qualified { liquidity } => return Ok(Some(liquidity)),
                    SampleVerdict::Pending { liquidity, stable_count } => {
                        debug!("{:#x} liquidity {:.4} (stable {})", token, liquidity, stable_count);
                    }
                },
                Err(e) if e.is_exhausted() => return Err(e),
                Err(e) => warn!("Liquidity sample for {:#x} failed: {}", token, e),
            }

            if Instant::now() >= deadline {
                debug!("{:#x} timed out after {} stable samples", token, sampler.stable_count());
                return Ok(None);
            }
            sleep(interval).await;
        }
    }

    async fn record(&self, qualified: &QualifiedToken) {
        let token = Token {
            address: qualified.token,
            network: self.facade.network().to_string(),
            exchange: self.facade.exchange().to_string(),
            discovered_at: Utc::now(),
            initial_price: qualified.initial_price,
            targets_hit: BTreeSet::new(),
        };
        if let Err(e) = self.store.save_token(&token).await {
            warn!("Failed to save token {:#x}: {}", qualified.token, e);
        }
        for share in &qualified.lock.shares {
            if let Err(e) = self.store.save_lock(qualified.token, &token.network, share).await {
                warn!("Failed to save {} lock for {:#x}: {}", share.platform, qualified.token, e);
            }
        }
    }
}

fn reject(token: Address, reason: Rejection) -> QualificationVerdict {
    info!("❌ {:#x} rejected: {}", token, reason);
    QualificationVerdict::Fail { token, reason }
}

fn fail_or_abort(token: Address, error: SniperError) -> CallResult<QualificationVerdict> {
    if error.is_exhausted() {
        Err(error)
    } else {
        Ok(reject(token, Rejection::AnalysisFailed(error.to_string())))
    }
}
