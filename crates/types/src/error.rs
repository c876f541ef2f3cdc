use thiserror::Error;

/// Errors raised by a signing round.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SigningError {
    #[error("Invalid signing request: {0}")]
    InvalidRequest(String),

    #[error("Signing cancelled")]
    Cancelled,

    /// The ceremony itself reported failure. Not retried internally.
    #[error("Keysign failed: {reason} (blamed: {blamed:?})")]
    KeysignFailed { reason: String, blamed: Vec<String> },

    /// Signature count or content disagrees with the request.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Signature verification failed for digest {index}: {reason}")]
    VerificationFailed { index: usize, reason: String },

    #[error("Key signer error: {0}")]
    Signer(String),
}

impl SigningError {
    /// Whether a caller may reasonably start a fresh round.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SigningError::Cancelled | SigningError::KeysignFailed { .. } | SigningError::Signer(_)
        )
    }
}

/// Errors from the external ledger client. Always transient from the
/// coordination layer's point of view.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Ledger RPC error: {0}")]
    Rpc(String),

    #[error("Ledger broadcast failed: {0}")]
    Broadcast(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Errors from the multi-party signer transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeySignerError {
    #[error("Signer unavailable: {0}")]
    Unavailable(String),

    #[error("Signer request rejected: {0}")]
    Rejected(String),
}

/// Errors from the peer-to-peer transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    #[error("Peer {0} unreachable")]
    Unreachable(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("No peer ID for pubkey: {0}")]
    InvalidPubkey(String),
}
