//! Shared types for the threshold signing coordination layer.
//!
//! This crate holds the data that crosses crate boundaries: chain
//! identifiers, digests and recoverable signatures, the records exchanged
//! with the external ledger, the wire shapes of the multi-party signer, and
//! the traits through which the orchestrator reaches those collaborators.

pub mod chain;
pub mod error;
pub mod interfaces;
pub mod ledger;
pub mod tss;

pub use chain::{BtcNetworkKind, ChainId, ChainKind};
pub use error::{KeySignerError, LedgerError, PeerError, SigningError};
pub use interfaces::{KeyGenerator, KeySigner, LedgerClient, PeerNetwork, TssSigner};
pub use ledger::{BlameRecord, KeygenStatus, KeygenTask, ReceiveStatus, TssRecord};
pub use tss::{
    Blame, BlameNode, Digest, KeygenRequest, KeygenResponse, KeysignRequest, KeysignResponse,
    PeerId, Signature65, Status, WireSignature,
};
