//! Mempool inspection for stuck outbounds.

use bitcoin::Txid;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;

use crate::error::{BitcoinError, Result};
use crate::rpc::BitcoinRpc;

/// Expected time between blocks.
pub const BLOCK_INTERVAL: Duration = Duration::from_secs(600);

/// Where an outbound stands in the mempool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingStatus {
    /// Confirmed, replaced or dropped.
    NotInMempool,
    Pending(Duration),
    Stuck(Duration),
}

impl PendingStatus {
    pub fn is_stuck(&self) -> bool {
        matches!(self, PendingStatus::Stuck(_))
    }

    /// Time spent in the mempool so far.
    pub fn pending_for(&self) -> Duration {
        match self {
            PendingStatus::NotInMempool => Duration::ZERO,
            PendingStatus::Pending(d) | PendingStatus::Stuck(d) => *d,
        }
    }
}

/// A transaction is stuck once it has waited longer than
/// `max_wait_blocks` block intervals and the tip has moved more than
/// `max_wait_blocks` past the height it entered at.
pub async fn is_tx_stuck_in_mempool(
    rpc: &dyn BitcoinRpc,
    txid: &Txid,
    max_wait_blocks: u64,
) -> Result<PendingStatus> {
    is_tx_stuck_at(rpc, txid, max_wait_blocks, Utc::now()).await
}

pub(crate) async fn is_tx_stuck_at(
    rpc: &dyn BitcoinRpc,
    txid: &Txid,
    max_wait_blocks: u64,
    now: DateTime<Utc>,
) -> Result<PendingStatus> {
    let last_block = rpc.get_block_count().await?;

    let Some(entry) = rpc.get_mempool_entry(txid).await? else {
        return Ok(PendingStatus::NotInMempool);
    };

    let pending_secs = (now.timestamp() - entry.time).max(0) as u64;
    let pending = Duration::from_secs(pending_secs);
    let max_wait =
        BLOCK_INTERVAL.saturating_mul(u32::try_from(max_wait_blocks).unwrap_or(u32::MAX));

    if pending > max_wait && last_block > entry.height.saturating_add(max_wait_blocks) {
        debug!(%txid, ?pending, last_block, entry_height = entry.height, "Outbound stuck");
        return Ok(PendingStatus::Stuck(pending));
    }

    Ok(PendingStatus::Pending(pending))
}

/// Aggregate fees of a chain of unconfirmed transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MempoolParents {
    pub tx_count: u64,
    pub total_fees: u64,
    pub total_vsize: u64,
    /// sat/vB, rounded up.
    pub avg_fee_rate: u64,
}

/// Walk from `child` through first-input parents while they are still in
/// the mempool, summing their fees and sizes.
pub async fn mempool_parents_fees(rpc: &dyn BitcoinRpc, child: &Txid) -> Result<MempoolParents> {
    let mut tx_count = 0u64;
    let mut total_fees = 0u64;
    let mut total_vsize = 0u64;

    let mut cursor = *child;
    while let Some(entry) = rpc.get_mempool_entry(&cursor).await? {
        tx_count += 1;
        total_fees += entry.fee_sats;
        total_vsize += entry.vsize;

        let tx = rpc.get_raw_transaction(&cursor).await?;
        let Some(first) = tx.input.first() else {
            return Err(BitcoinError::InvalidTransaction(format!(
                "mempool tx {} has no inputs",
                cursor
            )));
        };
        cursor = first.previous_output.txid;
    }

    if tx_count == 0 || total_fees == 0 || total_vsize == 0 {
        return Err(BitcoinError::InvalidTransaction(format!(
            "no pending fees for {}: {} txs, {} sats, {} vB",
            child, tx_count, total_fees, total_vsize
        )));
    }

    Ok(MempoolParents {
        tx_count,
        total_fees,
        total_vsize,
        avg_fee_rate: total_fees.div_ceil(total_vsize),
    })
}
