//! UTXO selection for outbounds.

use bitcoin::{OutPoint, ScriptBuf, Txid};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BitcoinError, Result};
use crate::fee::nonce_mark_amount;

/// An unspent output owned by the TSS address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: Txid,
    pub vout: u32,
    pub amount_sats: u64,
    pub script_pubkey: ScriptBuf,
    pub confirmations: u64,
}

impl Utxo {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.txid,
            vout: self.vout,
        }
    }
}

/// UTXOs chosen to fund one outbound, nonce mark first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub utxos: Vec<Utxo>,
    pub total_sats: u64,
}

/// Locate the nonce-mark output the outbound for `nonce` left behind.
///
/// It is output 0 of that outbound and carries exactly
/// `nonce_mark_amount(nonce)`.
pub fn find_nonce_mark(utxos: &[Utxo], nonce: u64, outbound_txid: &Txid) -> Option<usize> {
    let amount = nonce_mark_amount(nonce);
    utxos
        .iter()
        .position(|u| u.txid == *outbound_txid && u.vout == 0 && u.amount_sats == amount)
}

/// Select UTXOs covering `amount` for the outbound with `nonce`.
///
/// `utxos` is sorted ascending by amount before selection. For `nonce > 0`
/// the nonce mark of `nonce - 1`, an output of `prev_outbound`, must be
/// present and becomes the first input. The rest are taken smallest first
/// in a window of at most `max_inputs`; once the window is full it slides
/// towards larger outputs.
pub fn select_utxos(
    utxos: &[Utxo],
    amount: u64,
    max_inputs: usize,
    nonce: u64,
    prev_outbound: Option<&Txid>,
) -> Result<Selection> {
    if max_inputs == 0 {
        return Err(BitcoinError::InsufficientFunds {
            available: 0,
            required: amount,
        });
    }

    let mut sorted = utxos.to_vec();
    sorted.sort_by(|a, b| {
        a.amount_sats
            .cmp(&b.amount_sats)
            .then_with(|| a.txid.cmp(&b.txid))
            .then_with(|| a.vout.cmp(&b.vout))
    });

    let mark_index = if nonce > 0 {
        let prev = prev_outbound.ok_or(BitcoinError::NonceMarkNotFound { nonce: nonce - 1 })?;
        let index = find_nonce_mark(&sorted, nonce - 1, prev)
            .ok_or(BitcoinError::NonceMarkNotFound { nonce: nonce - 1 })?;
        Some(index)
    } else {
        None
    };

    // The nonce mark always takes one slot.
    let slots = if mark_index.is_some() {
        max_inputs - 1
    } else {
        max_inputs
    };

    let candidates: Vec<&Utxo> = sorted
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != mark_index)
        .map(|(_, u)| u)
        .collect();

    let mut total = mark_index.map(|i| sorted[i].amount_sats).unwrap_or(0);
    let (mut left, mut right) = (0usize, 0usize);
    while total < amount && right < candidates.len() {
        if right - left < slots {
            total += candidates[right].amount_sats;
        } else if slots > 0 {
            total -= candidates[left].amount_sats;
            total += candidates[right].amount_sats;
            left += 1;
        } else {
            break;
        }
        right += 1;
    }

    if total < amount {
        return Err(BitcoinError::InsufficientFunds {
            available: total,
            required: amount,
        });
    }

    let mut selected = Vec::with_capacity(right - left + 1);
    if let Some(i) = mark_index {
        selected.push(sorted[i].clone());
    }
    selected.extend(candidates[left..right].iter().map(|u| (*u).clone()));

    debug!(
        nonce,
        inputs = selected.len(),
        total_sats = total,
        amount_sats = amount,
        "Selected UTXOs"
    );

    Ok(Selection {
        utxos: selected,
        total_sats: total,
    })
}
