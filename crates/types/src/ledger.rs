//! Records read from and written to the external ledger.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::tss::BlameNode;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum KeygenStatus {
    Pending,
    Success,
    Failed,
    /// Any status this node does not understand.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for KeygenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeygenStatus::Pending => write!(f, "pending"),
            KeygenStatus::Success => write!(f, "success"),
            KeygenStatus::Failed => write!(f, "failed"),
            KeygenStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Keygen descriptor published by the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeygenTask {
    pub status: KeygenStatus,
    /// Bech32 pubkeys of the participants.
    pub granted_pubkeys: Vec<String>,
    pub block_number: i64,
}

/// A TSS key the ledger knows about.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TssRecord {
    pub tss_pubkey: String,
    pub tss_participant_list: Vec<String>,
    pub finalized_zeta_height: i64,
    pub keygen_zeta_height: i64,
}

impl TssRecord {
    pub fn has_participant(&self, pubkey: &str) -> bool {
        self.tss_participant_list.iter().any(|p| p == pubkey)
    }
}

/// Vote status posted after a keygen attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReceiveStatus {
    Success,
    Failed,
}

impl fmt::Display for ReceiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceiveStatus::Success => write!(f, "success"),
            ReceiveStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Fault attribution submitted to the ledger after a failed ceremony.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlameRecord {
    pub index: String,
    pub fail_reason: String,
    pub nodes: Vec<BlameNode>,
}

impl BlameRecord {
    pub fn accused(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.pubkey.as_str())
    }
}
