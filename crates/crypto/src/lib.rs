//! Public key handling and signature verification for the TSS key.
//!
//! The shared key is published on the ledger as a bech32 string. [`PubKey`]
//! parses it once and derives every chain-specific address from it;
//! [`verify_signature`] checks a recoverable signature returned by the
//! signer against that key.

pub mod blame;
pub mod error;
pub mod pubkey;
pub mod verify;

pub use blame::{blame_index, combine_digests, keccak256, keygen_blame_index};
pub use error::{CryptoError, Result};
pub use pubkey::{btc_network, PubKey, DEFAULT_PUBKEY_HRP};
pub use verify::verify_signature;
