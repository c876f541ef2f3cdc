//! Deterministic identifiers for blame submissions.
//!
//! The ledger deduplicates blame records by index, so every node must build
//! the same string for the same failed round.

use base64::prelude::*;
use sha2::Sha256;
use sha3::{Digest as _, Keccak256};
use threshold_types::{ChainId, Digest, KeygenRequest};

use crate::error::{CryptoError, Result};

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// Hex of the double SHA-256 over the concatenated base64 digests.
pub fn combine_digests(digests: &[Digest]) -> String {
    let joined: String = digests.iter().map(|d| BASE64_STANDARD.encode(d)).collect();
    let first = Sha256::digest(joined.as_bytes());
    let second = Sha256::digest(first);
    hex::encode(second)
}

pub fn blame_index(chain_id: ChainId, nonce: u64, combined_digest: &str, height: u64) -> String {
    format!("{}-{}-{}-{}", chain_id, nonce, combined_digest, height)
}

pub fn keygen_blame_index(request: &KeygenRequest, height: i64) -> Result<String> {
    let bytes = serde_json::to_vec(request)
        .map_err(|e| CryptoError::Encoding(format!("keygen request: {}", e)))?;
    Ok(format!("keygen-{}-{}", hex::encode(keccak256(&bytes)), height))
}
