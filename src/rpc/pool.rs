//! Endpoint Pool Manager
//!
//! Runs chain operations against the current endpoint of one network and
//! rotates through the rest on connection-class failures.
//!
//! Try-order at construction: endpoints that succeeded before (most recent
//! first, from the store), then the configured order. Per `execute` call:
//! - success: outcome persisted, value normalized and returned
//! - transient failure: outcome persisted, rotate, wait `rotation_delay`
//!   then `rotation_delay x attempt`, try again
//! - anything else: returned to the caller untouched
//! - every attempt used up: `SniperError::Exhausted` with the last message
//!
//! `acquire_fresh_session` is the blocking re-resolution path. It never
//! gives up; it backs off between passes instead.
//!
//! Author: AI-Generated
//! Created: 2026-10-16

use super::connector::Connector;
use crate::config::{secs, EndpointSettings};
use crate::error::{CallResult, SniperError};
use crate::store::{EndpointOutcome, PositionStore};
use crate::types::{Endpoint, PairCreated, PairReserves, TokenMetadata, TxOutcome};
use alloy::primitives::{Address, Bytes, B256, U256};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// A probe may lag the highest height already seen by this many blocks
const HEIGHT_TOLERANCE: u64 = 64;

// ── Result normalization ───────────────────────────────────────────────

/// Values returned through the pool. Hex strings coming back without their
/// `0x` prefix are fixed up here so every caller sees one wire format.
pub trait WireValue: Sized {
    fn normalize(self) -> Self {
        self
    }
}

fn normalize_hex(value: String) -> String {
    let bare_hex = value.len() >= 40 && value.chars().all(|c| c.is_ascii_hexdigit());
    if bare_hex {
        format!("0x{}", value)
    } else {
        value
    }
}

impl WireValue for String {
    fn normalize(self) -> Self {
        normalize_hex(self)
    }
}

impl WireValue for TxOutcome {
    fn normalize(self) -> Self {
        match self {
            TxOutcome::Confirmed { tx_hash, amount_in, amount_out } => TxOutcome::Confirmed {
                tx_hash: normalize_hex(tx_hash),
                amount_in,
                amount_out,
            },
            failed => failed,
        }
    }
}

impl<T: WireValue> WireValue for Option<T> {
    fn normalize(self) -> Self {
        self.map(WireValue::normalize)
    }
}

macro_rules! passthrough_wire_value {
    ($($t:ty),* $(,)?) => {
        $(impl WireValue for $t {})*
    };
}

passthrough_wire_value!(
    (),
    bool,
    u8,
    u64,
    usize,
    u128,
    Address,
    U256,
    B256,
    Bytes,
    Vec<U256>,
    Vec<PairCreated>,
    PairReserves,
    TokenMetadata,
);

// ── Pool ───────────────────────────────────────────────────────────────

struct PoolState<S> {
    endpoints: Vec<Endpoint>,
    current: usize,
    /// Lazily (re)connected after a rotation
    session: Option<S>,
    highest_height: u64,
}

pub struct EndpointPool<C: Connector> {
    network: String,
    connector: C,
    store: Arc<dyn PositionStore>,
    settings: EndpointSettings,
    configured: Vec<String>,
    state: Mutex<PoolState<C::Session>>,
}

/// Recently successful first (only URLs still configured), then config order
fn merge_order(recent: Vec<String>, configured: &[String]) -> Vec<String> {
    let mut ordered: Vec<String> = Vec::with_capacity(configured.len());
    for url in recent.into_iter().filter(|u| configured.contains(u)) {
        if !ordered.contains(&url) {
            ordered.push(url);
        }
    }
    for url in configured {
        if !ordered.contains(url) {
            ordered.push(url.clone());
        }
    }
    ordered
}

impl<C: Connector> EndpointPool<C> {
    pub async fn new(
        network: &str,
        urls: &[String],
        connector: C,
        store: Arc<dyn PositionStore>,
        settings: EndpointSettings,
    ) -> CallResult<Self> {
        if urls.is_empty() {
            return Err(SniperError::Configuration(format!("no endpoints configured for {}", network)));
        }

        let pool = Self {
            network: network.to_string(),
            connector,
            store,
            settings,
            configured: urls.to_vec(),
            state: Mutex::new(PoolState {
                endpoints: Vec::new(),
                current: 0,
                session: None,
                highest_height: 0,
            }),
        };

        let ordered = pool.ordered_candidates().await;
        info!("Endpoint order for {}: {:?}", network, ordered);
        pool.state.lock().await.endpoints = ordered
            .into_iter()
            .enumerate()
            .map(|(rank, url)| Endpoint::new(url, rank))
            .collect();

        Ok(pool)
    }

    /// Current endpoint list, in try-order
    pub async fn snapshot(&self) -> Vec<Endpoint> {
        self.state.lock().await.endpoints.clone()
    }

    pub async fn current_url(&self) -> String {
        let state = self.state.lock().await;
        state.endpoints.get(state.current).map(|e| e.url.clone()).unwrap_or_default()
    }

    async fn ordered_candidates(&self) -> Vec<String> {
        let recent = match self.store.list_endpoints_by_recent_success(&self.network).await {
            Ok(urls) => urls,
            Err(e) => {
                warn!("Could not read endpoint history for {}: {}", self.network, e);
                Vec::new()
            }
        };
        merge_order(recent, &self.configured)
    }

    fn max_attempts(&self, endpoint_count: usize) -> usize {
        match self.settings.max_retries_per_call {
            0 => endpoint_count,
            n => n,
        }
    }

    /// Current endpoint and a session for it, connecting if needed
    async fn checkout(&self) -> (usize, String, CallResult<C::Session>) {
        let mut state = self.state.lock().await;
        let index = state.current;
        let url = state.endpoints.get(index).map(|e| e.url.clone()).unwrap_or_default();

        if let Some(session) = &state.session {
            return (index, url, Ok(session.clone()));
        }

        let connected = match timeout(secs(self.settings.probe_timeout), self.connector.connect(&url)).await {
            Ok(result) => result,
            Err(_) => Err(SniperError::Transient(format!("connect to {} timed out", url))),
        };
        if let Ok(session) = &connected {
            state.session = Some(session.clone());
        }
        (index, url, connected)
    }

    /// Run `op` with rotation on transient failures
    pub async fn execute<T, F, Fut>(&self, label: &str, op: F) -> CallResult<T>
    where
        T: WireValue + Send,
        F: Fn(C::Session) -> Fut + Send + Sync,
        Fut: Future<Output = CallResult<T>> + Send,
    {
        let endpoint_count = self.state.lock().await.endpoints.len();
        let attempts = self.max_attempts(endpoint_count);
        let call_timeout = secs(self.settings.call_timeout);
        let rotation_delay = secs(self.settings.rotation_delay);
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=attempts {
            let (index, url, session) = self.checkout().await;

            let result = match session {
                Ok(session) => match timeout(call_timeout, op(session)).await {
                    Ok(result) => result,
                    Err(_) => Err(SniperError::Transient(format!(
                        "{} timed out after {:?}",
                        label, call_timeout
                    ))),
                },
                Err(e) if matches!(e, SniperError::Configuration(_)) => Err(e),
                Err(e) => Err(SniperError::Transient(e.to_string())),
            };

            match result {
                Ok(value) => {
                    self.record_success(&url).await;
                    return Ok(value.normalize());
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        "⚠️ {} failed on {} [{}] (attempt {}/{}): {}",
                        label, self.network, url, attempt, attempts, e
                    );
                    self.record_failure(&url, &e).await;
                    self.rotate_from(index).await;
                    last_error = e.to_string();

                    if attempt < attempts {
                        sleep(rotation_delay).await;
                        sleep(rotation_delay * attempt as u32).await;
                    }
                }
                Err(e) => {
                    debug!("{} on {} failed without retry: {}", label, self.network, e);
                    return Err(e);
                }
            }
        }

        Err(SniperError::Exhausted {
            network: self.network.clone(),
            attempts,
            last_error,
        })
    }

    /// Advance past `index` unless another caller already did
    async fn rotate_from(&self, index: usize) {
        let mut state = self.state.lock().await;
        if state.current != index || state.endpoints.is_empty() {
            return;
        }
        state.current = (index + 1) % state.endpoints.len();
        state.session = None;
        if let Some(next) = state.endpoints.get(state.current) {
            info!("🔄 Rotating {} endpoint to {}", self.network, next.url);
        }
    }

    async fn record_success(&self, url: &str) {
        let now = Utc::now();
        {
            let mut state = self.state.lock().await;
            if let Some(endpoint) = state.endpoints.iter_mut().find(|e| e.url == url) {
                endpoint.consecutive_failures = 0;
                endpoint.last_success = Some(now);
            }
        }
        self.persist(EndpointOutcome {
            network: self.network.clone(),
            url: url.to_string(),
            success: true,
            at: now,
            error: None,
        })
        .await;
    }

    async fn record_failure(&self, url: &str, error: &SniperError) {
        let now = Utc::now();
        {
            let mut state = self.state.lock().await;
            if let Some(endpoint) = state.endpoints.iter_mut().find(|e| e.url == url) {
                endpoint.consecutive_failures += 1;
                endpoint.last_error = Some(error.to_string());
            }
        }
        self.persist(EndpointOutcome {
            network: self.network.clone(),
            url: url.to_string(),
            success: false,
            at: now,
            error: Some(error.to_string()),
        })
        .await;
    }

    async fn persist(&self, outcome: EndpointOutcome) {
        if let Err(e) = self.store.record_endpoint_outcome(&outcome).await {
            warn!("Failed to persist endpoint outcome for {}: {}", outcome.url, e);
        }
    }

    // ── Full re-resolution ─────────────────────────────────────────────

    async fn probe(&self, url: &str) -> CallResult<(C::Session, u64)> {
        let attempt = async {
            let session = self.connector.connect(url).await?;
            let height = self.connector.chain_height(&session).await?;
            Ok::<_, SniperError>((session, height))
        };
        let (session, height) = timeout(secs(self.settings.probe_timeout), attempt)
            .await
            .map_err(|_| SniperError::Transient(format!("probe of {} timed out", url)))??;

        let highest = self.state.lock().await.highest_height;
        if height == 0 || height.saturating_add(HEIGHT_TOLERANCE) < highest {
            return Err(SniperError::DataIntegrity(format!(
                "implausible height {} (highest seen {})",
                height, highest
            )));
        }
        Ok((session, height))
    }

    /// Probe candidates until one answers with a plausible height and make
    /// it the current session. Loops until it succeeds.
    pub async fn acquire_fresh_session(&self) -> CallResult<String> {
        let mut pass: u32 = 0;

        loop {
            pass += 1;
            let candidates = self.ordered_candidates().await;
            if candidates.is_empty() {
                return Err(SniperError::Configuration(format!(
                    "no endpoints configured for {}",
                    self.network
                )));
            }

            for url in &candidates {
                match self.probe(url).await {
                    Ok((session, height)) => {
                        {
                            let mut state = self.state.lock().await;
                            let previous = std::mem::take(&mut state.endpoints);
                            state.endpoints = candidates
                                .iter()
                                .enumerate()
                                .map(|(rank, u)| {
                                    let mut endpoint = previous
                                        .iter()
                                        .find(|e| &e.url == u)
                                        .cloned()
                                        .unwrap_or_else(|| Endpoint::new(u.clone(), rank));
                                    endpoint.rank = rank;
                                    endpoint
                                })
                                .collect();
                            state.current = candidates.iter().position(|u| u == url).unwrap_or(0);
                            state.session = Some(session);
                            state.highest_height = state.highest_height.max(height);
                        }
                        self.record_success(url).await;
                        info!("✅ Fresh session on {} via {} (height {})", self.network, url, height);
                        return Ok(url.clone());
                    }
                    Err(e) => {
                        warn!("Probe failed for {} [{}]: {}", self.network, url, e);
                        self.record_failure(url, &e).await;
                    }
                }
            }

            let backoff = self.session_backoff(pass);
            warn!(
                "❌ No live endpoint for {} after pass {}, retrying in {:?}",
                self.network, pass, backoff
            );
            sleep(backoff).await;
        }
    }

    fn session_backoff(&self, pass: u32) -> Duration {
        let wait = self.settings.session_backoff_base * pass as f64;
        secs(wait.min(self.settings.session_backoff_cap))
    }
}
