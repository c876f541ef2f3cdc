//! Outbound parameters as handed over by the ledger, and the validated form
//! the signer consumes.

use bitcoin::{Address, Network};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

use threshold_crypto::btc_network;
use threshold_types::{ChainId, ChainKind};

use crate::error::{BitcoinError, Result};
use crate::fee::DUST_THRESHOLD;

/// Outbound parameters of one cross-chain transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundParams {
    pub cctx_index: String,
    pub receiver: String,
    pub receiver_chain_id: ChainId,
    pub amount_sats: u64,
    /// Fee rate in sat/vB fixed when the outbound was created.
    pub gas_price: u64,
    /// Most recent fee rate in sat/vB; the ledger raises it while the
    /// outbound stays pending.
    pub gas_price_latest: u64,
    pub tss_nonce: u64,
    /// Receiver or sender is on a compliance list.
    #[serde(default)]
    pub restricted: bool,
}

/// Everything needed to build and sign one withdrawal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundData {
    pub chain_id: ChainId,
    pub to: Address,
    /// Zero iff `cancel_tx`.
    pub amount_sats: u64,
    /// sat/vB, strictly above `min_relay_fee`.
    pub fee_rate: u64,
    pub fee_rate_latest: u64,
    /// The ledger has raised the rate since the outbound was created.
    pub fee_rate_bumped: bool,
    pub min_relay_fee: u64,
    pub height: u64,
    pub nonce: u64,
    pub cancel_tx: bool,
}

/// Network a Bitcoin chain id uses.
pub fn network_for(chain_id: ChainId) -> Result<Network> {
    match chain_id.kind() {
        ChainKind::Bitcoin(kind) => Ok(btc_network(kind)),
        _ => Err(BitcoinError::InvalidAddress(format!(
            "chain {} is not a Bitcoin chain",
            chain_id
        ))),
    }
}

impl OutboundData {
    /// Validate `params` for signing at `height`. `min_relay_fee` is the
    /// node's relay floor in sat/vB.
    pub fn new(params: &OutboundParams, height: u64, min_relay_fee: u64) -> Result<Self> {
        let chain_id = params.receiver_chain_id;
        let network = network_for(chain_id)?;

        if params.gas_price == 0 {
            return Err(BitcoinError::InvalidFeeRate(format!(
                "zero gas price for cctx {}",
                params.cctx_index
            )));
        }
        // Paying the floor on top keeps the rate strictly above it.
        let fee_rate = params.gas_price + min_relay_fee;
        let fee_rate_latest = params.gas_price_latest.max(params.gas_price) + min_relay_fee;

        let to = Address::from_str(&params.receiver)
            .map_err(|e| BitcoinError::InvalidAddress(format!("{}: {}", params.receiver, e)))?
            .require_network(network)
            .map_err(|e| BitcoinError::InvalidAddress(format!("{}: {}", params.receiver, e)))?;

        let cancel_tx = if params.restricted {
            warn!(cctx = %params.cctx_index, "Restricted outbound, cancelling");
            true
        } else if params.amount_sats < DUST_THRESHOLD {
            warn!(
                cctx = %params.cctx_index,
                amount_sats = params.amount_sats,
                "Outbound amount below dust, cancelling"
            );
            true
        } else {
            false
        };

        Ok(Self {
            chain_id,
            to,
            amount_sats: if cancel_tx { 0 } else { params.amount_sats },
            fee_rate,
            fee_rate_latest,
            fee_rate_bumped: params.gas_price_latest > params.gas_price,
            min_relay_fee,
            height,
            nonce: params.tss_nonce,
            cancel_tx,
        })
    }
}
