//! The Bitcoin node as seen by the outbound signer.
//!
//! Implementations wrap a node's JSON-RPC interface; amounts are converted
//! to satoshis at that boundary.

use async_trait::async_trait;
use bitcoin::{Address, Transaction, Txid};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::utxo::Utxo;

/// A transaction's entry in the node's mempool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MempoolEntry {
    /// Unix seconds at which the transaction entered the mempool.
    pub time: i64,
    /// Chain height when the transaction entered the mempool.
    pub height: u64,
    pub fee_sats: u64,
    pub vsize: u64,
}

#[async_trait]
pub trait BitcoinRpc: Send + Sync {
    async fn get_block_count(&self) -> Result<u64>;

    /// Fee rate in BTC/kB for confirmation within `conf_target` blocks.
    async fn estimate_smart_fee(&self, conf_target: u32) -> Result<f64>;

    /// Minimum relay fee in BTC/kB.
    async fn get_network_relay_fee(&self) -> Result<f64>;

    /// `None` when the transaction is not in the mempool.
    async fn get_mempool_entry(&self, txid: &Txid) -> Result<Option<MempoolEntry>>;

    async fn get_raw_transaction(&self, txid: &Txid) -> Result<Transaction>;

    async fn send_raw_transaction(&self, tx: &Transaction) -> Result<Txid>;

    async fn list_unspent(&self, address: &Address) -> Result<Vec<Utxo>>;
}
