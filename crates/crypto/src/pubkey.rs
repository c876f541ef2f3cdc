use bech32::{Bech32, Hrp};
use bitcoin::{Address, CompressedPublicKey, Network};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use sha3::{Digest, Keccak256};
use std::fmt;
use threshold_types::{BtcNetworkKind, ChainId, ChainKind};

use crate::error::{CryptoError, Result};

/// Human-readable part used for account pubkeys on the ledger.
pub const DEFAULT_PUBKEY_HRP: &str = "zetapub";

/// Amino type prefix for secp256k1 pubkeys.
const AMINO_SECP256K1_PREFIX: [u8; 5] = [0xeb, 0x5a, 0xe9, 0x87, 0x21];

/// The TSS public key. Immutable once constructed.
#[derive(Clone, PartialEq, Eq)]
pub struct PubKey {
    bech32: String,
    key: k256::PublicKey,
}

impl PubKey {
    /// Parse a bech32 pubkey, with or without the amino type prefix.
    pub fn from_bech32(value: &str) -> Result<Self> {
        let (_hrp, data) = bech32::decode(value).map_err(|e| CryptoError::InvalidPubKey {
            value: value.to_string(),
            reason: e.to_string(),
        })?;

        let raw = match data.strip_prefix(&AMINO_SECP256K1_PREFIX[..]) {
            Some(rest) => rest,
            None => &data[..],
        };

        let key = k256::PublicKey::from_sec1_bytes(raw).map_err(|e| CryptoError::InvalidPubKey {
            value: value.to_string(),
            reason: format!("not a secp256k1 point ({} bytes): {}", raw.len(), e),
        })?;

        Ok(Self {
            bech32: value.to_string(),
            key,
        })
    }

    /// Build from SEC1 bytes, encoding the bech32 form with [`DEFAULT_PUBKEY_HRP`].
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self> {
        let key = k256::PublicKey::from_sec1_bytes(bytes).map_err(|e| CryptoError::InvalidPubKey {
            value: hex::encode(bytes),
            reason: e.to_string(),
        })?;

        let compressed = key.to_encoded_point(true);
        let bech32 = encode_bech32(DEFAULT_PUBKEY_HRP, compressed.as_bytes())?;
        Ok(Self { bech32, key })
    }

    pub fn bech32(&self) -> &str {
        &self.bech32
    }

    /// Re-encode under a different human-readable part.
    pub fn to_bech32(&self, hrp: &str) -> Result<String> {
        encode_bech32(hrp, &self.compressed())
    }

    pub fn compressed(&self) -> [u8; 33] {
        let point = self.key.to_encoded_point(true);
        let mut out = [0u8; 33];
        out.copy_from_slice(point.as_bytes());
        out
    }

    pub fn uncompressed(&self) -> [u8; 65] {
        let point = self.key.to_encoded_point(false);
        let mut out = [0u8; 65];
        out.copy_from_slice(point.as_bytes());
        out
    }

    /// EIP-55 checksummed EVM address: last 20 bytes of keccak(X || Y).
    pub fn evm_address(&self) -> String {
        let uncompressed = self.uncompressed();
        let hash = Keccak256::digest(&uncompressed[1..]);
        let lower = hex::encode(&hash[12..]);

        let checksum = Keccak256::digest(lower.as_bytes());
        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            let nibble = (checksum[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }

    /// P2WPKH address on the network `chain` maps to.
    pub fn btc_address(&self, chain: ChainId) -> Result<Address> {
        let network = match chain.kind() {
            ChainKind::Bitcoin(kind) => btc_network(kind),
            _ => return Err(CryptoError::UnsupportedChain(chain)),
        };

        let compressed = CompressedPublicKey::from_slice(&self.compressed())
            .map_err(|e| CryptoError::Encoding(format!("compressed pubkey: {}", e)))?;
        Ok(Address::p2wpkh(&compressed, network))
    }

    /// Address of this key on `chain`, in the chain's native text form.
    pub fn derive_address(&self, chain: ChainId) -> Result<String> {
        match chain.kind() {
            ChainKind::Evm => Ok(self.evm_address()),
            ChainKind::Bitcoin(_) => self.btc_address(chain).map(|a| a.to_string()),
            ChainKind::Solana | ChainKind::Unknown => Err(CryptoError::UnsupportedChain(chain)),
        }
    }
}

impl fmt::Debug for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PubKey({})", self.bech32)
    }
}

impl fmt::Display for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bech32)
    }
}

pub fn btc_network(kind: BtcNetworkKind) -> Network {
    match kind {
        BtcNetworkKind::Mainnet => Network::Bitcoin,
        BtcNetworkKind::Testnet3 | BtcNetworkKind::Testnet4 => Network::Testnet,
        BtcNetworkKind::Signet => Network::Signet,
        BtcNetworkKind::Regtest => Network::Regtest,
    }
}

fn encode_bech32(hrp: &str, compressed: &[u8]) -> Result<String> {
    let hrp = Hrp::parse(hrp).map_err(|e| CryptoError::Encoding(format!("hrp {}: {}", hrp, e)))?;
    let mut data = Vec::with_capacity(AMINO_SECP256K1_PREFIX.len() + compressed.len());
    data.extend_from_slice(&AMINO_SECP256K1_PREFIX);
    data.extend_from_slice(compressed);
    bech32::encode::<Bech32>(hrp, &data).map_err(|e| CryptoError::Encoding(e.to_string()))
}
