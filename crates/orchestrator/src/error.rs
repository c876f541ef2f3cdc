//! Error types for the orchestration layer.

use thiserror::Error;
use threshold_crypto::CryptoError;
use threshold_types::{KeySignerError, LedgerError, SigningError};

/// Errors from the concurrency limiter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    /// No slot free and the caller asked not to wait.
    #[error("signing throttled: {pending} ceremonies pending")]
    Throttled { pending: u64 },

    #[error("acquire cancelled")]
    Cancelled,

    #[error("rate limiter closed")]
    Closed,
}

impl From<RateLimitError> for SigningError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::Cancelled => SigningError::Cancelled,
            other => SigningError::Signer(other.to_string()),
        }
    }
}

/// Errors raised while driving the keygen ceremony.
#[derive(Debug, Error)]
pub enum KeygenError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("keygen transport error: {0}")]
    Transport(#[from] KeySignerError),

    /// The ceremony ran and reported failure.
    #[error("keygen failed: {0}")]
    Failed(String),

    #[error("keygen timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("unexpected keygen status {0}")]
    UnexpectedStatus(String),

    /// The ceremony produced a key the node cannot parse.
    #[error("invalid keygen result: {0}")]
    InvalidKey(#[from] CryptoError),

    #[error("failed to vote on keygen outcome: {0}")]
    VoteFailed(LedgerError),

    #[error("keygen ceremony cancelled")]
    Cancelled,
}

/// Errors surfaced while bootstrapping the node.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("keygen error: {0}")]
    Keygen(#[from] KeygenError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("keystore error: {0}")]
    Keystore(String),

    #[error("missing key share for TSS {pubkey}")]
    MissingKeyShare { pubkey: String },

    #[error("invalid TSS address: {0}")]
    InvalidAddress(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, OrchestrationError>;
