//! Session connectors
//!
//! A `Connector` turns an endpoint URL into a live session and can ask that
//! session for the chain height (the liveness probe). The pool is generic
//! over it so rotation logic can be driven by scripted sessions in tests.
//!
//! Author: AI-Generated
//! Created: 2026-10-16

use crate::error::{CallResult, SniperError};
use alloy::network::EthereumWallet;
use alloy::providers::{DynProvider, Provider, ProviderBuilder, WsConnect};
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::reqwest::Url;
use async_trait::async_trait;
use tracing::debug;

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Session: Clone + Send + Sync + 'static;

    /// Open a session against one endpoint. Failures are treated as transient.
    async fn connect(&self, url: &str) -> CallResult<Self::Session>;

    /// Current chain height as seen by `session`
    async fn chain_height(&self, session: &Self::Session) -> CallResult<u64>;
}

/// Builds alloy providers (HTTP or WebSocket by URL scheme), with the
/// trading wallet attached when one is configured
#[derive(Clone, Default)]
pub struct AlloyConnector {
    wallet: Option<EthereumWallet>,
}

impl AlloyConnector {
    pub fn new(signer: Option<PrivateKeySigner>) -> Self {
        Self {
            wallet: signer.map(EthereumWallet::from),
        }
    }
}

fn is_ws(url: &str) -> bool {
    url.starts_with("ws://") || url.starts_with("wss://")
}

#[async_trait]
impl Connector for AlloyConnector {
    type Session = DynProvider;

    async fn connect(&self, url: &str) -> CallResult<DynProvider> {
        debug!("Connecting to {}", url);

        if is_ws(url) {
            let ws = WsConnect::new(url);
            let provider = match &self.wallet {
                Some(wallet) => ProviderBuilder::new()
                    .wallet(wallet.clone())
                    .connect_ws(ws)
                    .await
                    .map(|p| p.erased()),
                None => ProviderBuilder::new().connect_ws(ws).await.map(|p| p.erased()),
            };
            return provider.map_err(|e| SniperError::Transient(format!("ws connect {}: {}", url, e)));
        }

        let parsed: Url = url
            .parse()
            .map_err(|e| SniperError::Configuration(format!("invalid rpc url {}: {}", url, e)))?;
        let provider = match &self.wallet {
            Some(wallet) => ProviderBuilder::new()
                .wallet(wallet.clone())
                .connect_http(parsed)
                .erased(),
            None => ProviderBuilder::new().connect_http(parsed).erased(),
        };
        Ok(provider)
    }

    async fn chain_height(&self, session: &DynProvider) -> CallResult<u64> {
        session.get_block_number().await.map_err(SniperError::from_display)
    }
}
