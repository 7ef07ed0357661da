//! Error Taxonomy
//!
//! Call-level errors shared by the endpoint pool, the contract facade and the
//! lifecycle engine. Raw transport/contract messages are classified here so
//! that every caller decides retry-vs-propagate the same way.
//!
//! Author: AI-Generated
//! Created: 2026-10-16

use thiserror::Error;

/// Result alias for chain calls
pub type CallResult<T> = std::result::Result<T, SniperError>;

/// Substrings that mark a connection-class (rotatable) failure.
/// Matched case-insensitively against the rendered error message.
const TRANSIENT_MARKERS: &[&str] = &[
    "no route to host",
    "connection refused",
    "connection reset",
    "connection failed",
    "connection error",
    "connection aborted",
    "connection closed",
    "max retries exceeded",
    "timeout",
    "timed out",
    "limit exceeded",
    "invalid argument",
    "bad gateway",
    "gateway timeout",
    "service unavailable",
    "rate limit",
    "too many requests",
    "http error 429",
    "http error 502",
    "http error 503",
    "http error 504",
];

/// Substrings that mark an on-chain logic failure (not worth retrying)
const CONTRACT_MARKERS: &[&str] = &[
    "execution reverted",
    "revert",
    "insufficient_output_amount",
    "insufficient_input_amount",
    "transfer_failed",
    "insufficient funds",
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SniperError {
    /// Timeout, connection failure, rate-limit. Retried via rotation.
    #[error("transient RPC failure: {0}")]
    Transient(String),

    /// Every endpoint was tried for one call
    #[error("all {attempts} endpoint attempts exhausted on {network}: {last_error}")]
    Exhausted {
        network: String,
        attempts: usize,
        last_error: String,
    },

    /// Reverted swap, insufficient output and friends
    #[error("contract call failed: {0}")]
    ContractLogic(String),

    /// Persisted state does not match what the caller expected
    #[error("data integrity: {0}")]
    DataIntegrity(String),

    /// Missing secret, empty endpoint list, bad address
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Anything unclassified: propagated without retry
    #[error("{0}")]
    Fatal(String),
}

impl SniperError {
    /// Classify a raw error message
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        // Revert text often embeds "invalid argument"-like fragments, so check it first
        if CONTRACT_MARKERS.iter().any(|m| lower.contains(m)) {
            return SniperError::ContractLogic(message);
        }
        if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
            return SniperError::Transient(message);
        }
        SniperError::Fatal(message)
    }

    /// Classify any displayable error (alloy transport/contract errors)
    pub fn from_display<E: std::fmt::Display>(err: E) -> Self {
        Self::classify(err.to_string())
    }

    /// True for the connection class that triggers endpoint rotation
    pub fn is_transient(&self) -> bool {
        matches!(self, SniperError::Transient(_))
    }

    /// True once the pool has given up on a call
    pub fn is_exhausted(&self) -> bool {
        matches!(self, SniperError::Exhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_messages_are_transient() {
        for msg in [
            "error sending request: Connection refused (os error 111)",
            "HTTP error 429 with body: Too Many Requests",
            "502 Bad Gateway",
            "operation timed out",
            "daily request limit exceeded",
        ] {
            assert!(SniperError::classify(msg).is_transient(), "{msg}");
        }
    }

    #[test]
    fn test_revert_is_contract_logic() {
        let err = SniperError::classify("server returned an error response: execution reverted: UniswapV2Router: INSUFFICIENT_OUTPUT_AMOUNT");
        assert!(matches!(err, SniperError::ContractLogic(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_unknown_is_fatal() {
        let err = SniperError::classify("deserialization error: missing field `result`");
        assert!(matches!(err, SniperError::Fatal(_)));
    }

    #[test]
    fn test_exhausted_carries_last_error() {
        let err = SniperError::Exhausted {
            network: "bsc".to_string(),
            attempts: 2,
            last_error: "connection reset".to_string(),
        };
        assert!(err.is_exhausted());
        assert!(err.to_string().contains("connection reset"));
    }
}
