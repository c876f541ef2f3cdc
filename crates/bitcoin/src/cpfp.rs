//! Fee bumping for stuck outbounds.
//!
//! A stuck outbound is replaced by a copy of itself that pays more, with
//! the extra fee taken out of its change output. The replacement spends the
//! same inputs, so it must satisfy the replace-by-fee rules against every
//! pending transaction in the chain it belongs to: the fee delta has to
//! cover the target rate over the whole chain, and at least the relay fee
//! for the replacement's own size.

use bitcoin::{Amount, Transaction, Witness};
use tracing::{info, warn};

use crate::error::{BitcoinError, Result};
use crate::fee::{fee_rate_to_sat_per_vbyte, DUST_THRESHOLD};
use crate::mempool::{mempool_parents_fees, MempoolParents};
use crate::rpc::BitcoinRpc;

/// Percentage a rate must rise before a bump is worth it.
pub const FEE_BUMP_PERCENT: u64 = 20;

/// Confirmation target used for the live fee estimate.
const LIVE_RATE_CONF_TARGET: u32 = 1;

/// Outputs of a withdrawal: nonce mark, payment, change.
const CHANGE_OUTPUT_INDEX: usize = 2;

/// `ceil(rate * (100 + FEE_BUMP_PERCENT) / 100)` in integers.
pub fn bump_rate(rate: u64) -> u64 {
    (rate * (100 + FEE_BUMP_PERCENT)).div_ceil(100)
}

/// Inputs for one fee bump.
#[derive(Debug, Clone)]
pub struct CpfpPlan {
    /// The stuck transaction, as broadcast.
    pub tx: Transaction,
    /// Relay floor in sat/vB.
    pub min_relay_fee: u64,
    /// Rate the ledger currently asks for, sat/vB.
    pub cctx_rate: u64,
    /// Live network estimate, sat/vB.
    pub live_rate: u64,
    /// The stuck transaction and its pending ancestors.
    pub pending: MempoolParents,
}

impl CpfpPlan {
    /// Collect the live rate and pending-chain fees for `tx`.
    pub async fn fetch(
        rpc: &dyn BitcoinRpc,
        tx: Transaction,
        cctx_rate: u64,
        min_relay_fee: u64,
    ) -> Result<Self> {
        let live_rate = fee_rate_to_sat_per_vbyte(
            rpc.estimate_smart_fee(LIVE_RATE_CONF_TARGET).await?,
        )?;
        let pending = mempool_parents_fees(rpc, &tx.compute_txid()).await?;

        Ok(Self {
            tx,
            min_relay_fee,
            cctx_rate,
            live_rate,
            pending,
        })
    }
}

/// Result of a successful bump.
#[derive(Debug, Clone)]
pub struct FeeBump {
    /// Unsigned replacement.
    pub tx: Transaction,
    pub additional_fees: u64,
    /// Average rate of the pending chain once replaced, sat/vB.
    pub new_fee_rate: u64,
}

pub struct CpfpFeeBumper {
    plan: CpfpPlan,
}

impl CpfpFeeBumper {
    pub fn new(plan: CpfpPlan) -> Self {
        Self { plan }
    }

    pub fn plan(&self) -> &CpfpPlan {
        &self.plan
    }

    /// Build the unsigned replacement and the extra fee it pays.
    ///
    /// Returns `HoldRbf` while the ledger's rate has not risen enough over
    /// the pending average, or while the live rate runs ahead of it.
    pub fn bump_fee(&self) -> Result<FeeBump> {
        let plan = &self.plan;
        if plan.pending.total_vsize == 0 {
            return Err(BitcoinError::InvalidTransaction(
                "empty pending chain".to_string(),
            ));
        }
        let avg_rate = plan.pending.avg_fee_rate;

        let min_bump_rate = bump_rate(avg_rate);
        if plan.cctx_rate < min_bump_rate {
            return Err(BitcoinError::HoldRbf(format!(
                "cctx rate {} too low, need {} (avg {})",
                plan.cctx_rate, min_bump_rate, avg_rate
            )));
        }

        let bumped_rate = bump_rate(plan.cctx_rate);
        if plan.live_rate > bumped_rate {
            return Err(BitcoinError::HoldRbf(format!(
                "live rate {} too volatile, above {}",
                plan.live_rate, bumped_rate
            )));
        }

        let vsize = plan.tx.vsize() as u64;
        let min_relay_tx_fees = vsize * plan.min_relay_fee;
        let rbf_delta = (plan.pending.total_vsize * plan.cctx_rate)
            .saturating_sub(plan.pending.total_fees);
        let mut additional_fees = min_relay_tx_fees.max(rbf_delta);

        let mut tx = plan.tx.clone();
        for input in tx.input.iter_mut() {
            input.witness = Witness::new();
        }

        if tx.output.len() <= CHANGE_OUTPUT_INDEX {
            return Err(BitcoinError::NoReservedFees {
                outputs: tx.output.len(),
            });
        }

        let change = tx.output[CHANGE_OUTPUT_INDEX].value.to_sat();
        if change >= additional_fees + DUST_THRESHOLD {
            tx.output[CHANGE_OUTPUT_INDEX].value = Amount::from_sat(change - additional_fees);
        } else {
            warn!(
                change_sats = change,
                additional_fees, "Change cannot cover the bump, giving it up entirely"
            );
            tx.output.remove(CHANGE_OUTPUT_INDEX);
            additional_fees = change;
        }

        let new_fee_rate =
            (plan.pending.total_fees + additional_fees).div_ceil(plan.pending.total_vsize);

        info!(
            txid = %plan.tx.compute_txid(),
            cctx_rate = plan.cctx_rate,
            live_rate = plan.live_rate,
            avg_rate,
            additional_fees,
            new_fee_rate,
            "Fee bump prepared"
        );

        Ok(FeeBump {
            tx,
            additional_fees,
            new_fee_rate,
        })
    }
}
