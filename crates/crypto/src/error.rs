use thiserror::Error;
use threshold_types::ChainId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid public key {value}: {reason}")]
    InvalidPubKey { value: String, reason: String },

    #[error("No address scheme for chain {0}")]
    UnsupportedChain(ChainId),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Signature mismatch: recovered {recovered}, expected {expected}")]
    Mismatch { recovered: String, expected: String },

    #[error("Encoding error: {0}")]
    Encoding(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
