//! Errors raised while building, signing and bumping Bitcoin outbounds.

use thiserror::Error;
use threshold_crypto::CryptoError;
use threshold_types::{LedgerError, SigningError};

#[derive(Debug, Error)]
pub enum BitcoinError {
    #[error("Bitcoin RPC error: {0}")]
    Rpc(String),

    #[error("Invalid fee rate: {0}")]
    InvalidFeeRate(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Unsupported output address type: {0}")]
    UnsupportedAddressType(String),

    #[error("Insufficient funds: have {available} sats, need {required} sats")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("Nonce mark UTXO for nonce {nonce} not found")]
    NonceMarkNotFound { nonce: u64 },

    #[error("Remaining balance is negative: {0} sats")]
    NegativeRemainder(i64),

    /// The fee bump should wait; not a failure.
    #[error("RBF on hold: {0}")]
    HoldRbf(String),

    /// The stuck transaction has no change output to pay for a bump.
    #[error("No reserved fees: transaction has {outputs} outputs")]
    NoReservedFees { outputs: usize },

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Sighash computation error: {0}")]
    Sighash(String),

    #[error("Signing failed: {0}")]
    Signing(#[from] SigningError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Key error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Broadcast failed after {attempts} attempts: {last}")]
    Broadcast { attempts: u32, last: String },

    #[error("Cancelled")]
    Cancelled,
}

impl BitcoinError {
    /// Advisory holds: retry later, do not escalate.
    pub fn is_hold(&self) -> bool {
        matches!(self, BitcoinError::HoldRbf(_))
    }

    /// Malformed input that no retry will fix.
    pub fn is_fatal(&self) -> bool {
        match self {
            BitcoinError::NoReservedFees { .. }
            | BitcoinError::InvalidTransaction(_)
            | BitcoinError::InvalidAddress(_)
            | BitcoinError::UnsupportedAddressType(_)
            | BitcoinError::NegativeRemainder(_) => true,
            BitcoinError::Signing(e) => !e.is_retryable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BitcoinError>;
