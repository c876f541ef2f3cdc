//! Chain identifiers and the address scheme each one uses.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric chain identifier as assigned by the external ledger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId(pub i64);

impl ChainId {
    pub const ETHEREUM_MAINNET: ChainId = ChainId(1);
    pub const BITCOIN_MAINNET: ChainId = ChainId(8332);
    pub const BITCOIN_TESTNET: ChainId = ChainId(18332);
    pub const BITCOIN_SIGNET: ChainId = ChainId(18333);
    pub const BITCOIN_TESTNET4: ChainId = ChainId(18334);
    pub const BITCOIN_REGTEST: ChainId = ChainId(18444);
    pub const ZETA_MAINNET: ChainId = ChainId(7000);
    pub const ZETA_TESTNET: ChainId = ChainId(7001);
    pub const ZETA_PRIVNET: ChainId = ChainId(101);

    /// Which address family this chain belongs to.
    pub fn kind(&self) -> ChainKind {
        match self.0 {
            1 | 5 | 56 | 97 | 137 | 80001 | 11155111 | 1337 | 7000 | 7001 | 101 => ChainKind::Evm,
            8332 => ChainKind::Bitcoin(BtcNetworkKind::Mainnet),
            18332 => ChainKind::Bitcoin(BtcNetworkKind::Testnet3),
            18333 => ChainKind::Bitcoin(BtcNetworkKind::Signet),
            18334 => ChainKind::Bitcoin(BtcNetworkKind::Testnet4),
            18444 => ChainKind::Bitcoin(BtcNetworkKind::Regtest),
            900..=902 => ChainKind::Solana,
            _ => ChainKind::Unknown,
        }
    }

    pub fn is_bitcoin(&self) -> bool {
        matches!(self.kind(), ChainKind::Bitcoin(_))
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ChainId {
    fn from(id: i64) -> Self {
        ChainId(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainKind {
    Evm,
    Bitcoin(BtcNetworkKind),
    Solana,
    Unknown,
}

/// Bitcoin network parameters a chain id maps to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BtcNetworkKind {
    Mainnet,
    Testnet3,
    Testnet4,
    Signet,
    Regtest,
}

impl fmt::Display for BtcNetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BtcNetworkKind::Mainnet => write!(f, "mainnet"),
            BtcNetworkKind::Testnet3 => write!(f, "testnet3"),
            BtcNetworkKind::Testnet4 => write!(f, "testnet4"),
            BtcNetworkKind::Signet => write!(f, "signet"),
            BtcNetworkKind::Regtest => write!(f, "regtest"),
        }
    }
}
