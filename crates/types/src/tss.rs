//! Wire shapes exchanged with the multi-party signer.
//!
//! The signer speaks base64 strings for every digest and signature
//! component; conversion into fixed-size values happens in the orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// 32-byte message digest handed to a signing ceremony.
pub type Digest = [u8; 32];

/// Recoverable ECDSA signature laid out as `R (32) || S (32) || V (1)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature65(pub [u8; 65]);

impl Signature65 {
    pub fn from_parts(r: &[u8; 32], s: &[u8; 32], recovery_id: u8) -> Self {
        let mut bytes = [0u8; 65];
        bytes[..32].copy_from_slice(r);
        bytes[32..64].copy_from_slice(s);
        bytes[64] = recovery_id;
        Signature65(bytes)
    }

    pub fn r(&self) -> &[u8] {
        &self.0[..32]
    }

    pub fn s(&self) -> &[u8] {
        &self.0[32..64]
    }

    /// `R || S` without the recovery byte.
    pub fn compact(&self) -> &[u8] {
        &self.0[..64]
    }

    pub fn recovery_id(&self) -> u8 {
        self.0[64]
    }

    pub fn as_bytes(&self) -> &[u8; 65] {
        &self.0
    }
}

impl fmt::Debug for Signature65 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature65({})", hex::encode(self.0))
    }
}

/// libp2p-style peer identifier of a ceremony participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub String);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        PeerId(s)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        PeerId(s.to_string())
    }
}

/// Outcome reported by a ceremony.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    NA,
    Success,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlameNode {
    pub pubkey: String,
}

/// Fault attribution returned by a failed ceremony.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Blame {
    pub fail_reason: String,
    #[serde(default)]
    pub round: String,
    #[serde(default)]
    pub blame_nodes: Vec<BlameNode>,
}

impl Blame {
    pub fn new(fail_reason: impl Into<String>, blame_nodes: Vec<BlameNode>) -> Self {
        Self {
            fail_reason: fail_reason.into(),
            round: String::new(),
            blame_nodes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fail_reason.is_empty() && self.blame_nodes.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeysignRequest {
    pub pool_pub_key: String,
    /// Base64-encoded digests.
    pub messages: Vec<String>,
    pub block_height: i64,
    #[serde(default)]
    pub signer_pub_keys: Vec<String>,
    pub version: String,
}

/// One signature as produced by the signer. Every field is base64.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireSignature {
    pub msg: String,
    pub r: String,
    pub s: String,
    pub recovery_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct KeysignResponse {
    pub status: Status,
    #[serde(default)]
    pub signatures: Vec<WireSignature>,
    #[serde(default)]
    pub blame: Blame,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeygenRequest {
    pub keys: Vec<String>,
    pub block_height: i64,
    pub version: String,
    pub algo: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct KeygenResponse {
    pub pub_key: String,
    pub status: Status,
    #[serde(default)]
    pub blame: Blame,
}
