//! Outbound size and fee estimation.
//!
//! Sizes are in virtual bytes. Witness data is counted at a quarter weight,
//! truncated.

use bitcoin::{Address, AddressType};

use crate::error::{BitcoinError, Result};

pub const BYTES_PER_INPUT: u64 = 41;
pub const BYTES_PER_OUTPUT_P2TR: u64 = 43;
pub const BYTES_PER_OUTPUT_P2WSH: u64 = 43;
pub const BYTES_PER_OUTPUT_P2WPKH: u64 = 31;
pub const BYTES_PER_OUTPUT_P2SH: u64 = 32;
pub const BYTES_PER_OUTPUT_P2PKH: u64 = 34;
/// Rough average over the output types above.
pub const BYTES_PER_OUTPUT_AVG: u64 = 37;
pub const BYTES_FIRST_WITNESS: u64 = 110;
pub const BYTES_PER_WITNESS: u64 = 108;
const WITNESS_SCALE_FACTOR: u64 = 4;

/// `estimate_outbound_size(2, [p2wpkh])`
pub const OUTBOUND_BYTES_MIN: u64 = 239;
/// `estimate_outbound_size(21, [p2tr])`
pub const OUTBOUND_BYTES_MAX: u64 = 1543;

pub const SATS_PER_BTC: f64 = 100_000_000.0;
const BYTES_PER_KB: f64 = 1000.0;

/// Outputs below this are not worth creating.
pub const DUST_THRESHOLD: u64 = 1000;

/// Extra sats selected for every outbound so a later CPFP bump has change
/// to pay from.
pub const RESERVED_RBF_FEES: u64 = 10_000;

const NONCE_MARK_BASE: u64 = 2000;

/// Amount of the nonce-mark output for `nonce`.
pub fn nonce_mark_amount(nonce: u64) -> u64 {
    nonce + NONCE_MARK_BASE
}

/// Serialized size of a Bitcoin compact-size integer.
fn var_int_size(n: u64) -> u64 {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Version, lock time and the input/output counts.
pub fn wired_tx_size(num_inputs: u64, num_outputs: u64) -> u64 {
    8 + var_int_size(num_inputs) + var_int_size(num_outputs)
}

/// Virtual size of one output paying `to`.
pub fn output_size_by_address(to: &Address) -> Result<u64> {
    match to.address_type() {
        Some(AddressType::P2tr) => Ok(BYTES_PER_OUTPUT_P2TR),
        Some(AddressType::P2wsh) => Ok(BYTES_PER_OUTPUT_P2WSH),
        Some(AddressType::P2wpkh) => Ok(BYTES_PER_OUTPUT_P2WPKH),
        Some(AddressType::P2sh) => Ok(BYTES_PER_OUTPUT_P2SH),
        Some(AddressType::P2pkh) => Ok(BYTES_PER_OUTPUT_P2PKH),
        other => Err(BitcoinError::UnsupportedAddressType(format!(
            "{} ({:?})",
            to, other
        ))),
    }
}

/// Estimated virtual size of an outbound spending `num_inputs` P2WPKH
/// inputs, with a nonce-mark and change output plus one output per payee.
///
/// Zero inputs estimate to zero.
pub fn estimate_outbound_size(num_inputs: u64, payees: &[Address]) -> Result<u64> {
    if num_inputs == 0 {
        return Ok(0);
    }

    let num_outputs = 2 + payees.len() as u64;
    let bytes_wired = wired_tx_size(num_inputs, num_outputs);
    let bytes_input = num_inputs * BYTES_PER_INPUT;
    let bytes_output = 2 * BYTES_PER_OUTPUT_P2WPKH;

    let mut bytes_to_payees = 0;
    for to in payees {
        bytes_to_payees += output_size_by_address(to)?;
    }

    let bytes_witness = BYTES_FIRST_WITNESS + (num_inputs - 1) * BYTES_PER_WITNESS;

    Ok(bytes_wired
        + bytes_input
        + bytes_output
        + bytes_to_payees
        + bytes_witness / WITNESS_SCALE_FACTOR)
}

/// Size of a typical withdrawal: nonce-mark input, nonce-mark, payment and
/// change outputs.
pub fn outbound_size_withdrawer() -> u64 {
    wired_tx_size(1, 3)
        + BYTES_PER_INPUT
        + 2 * BYTES_PER_OUTPUT_P2WPKH
        + BYTES_PER_OUTPUT_AVG
        + BYTES_FIRST_WITNESS / WITNESS_SCALE_FACTOR
}

/// Size a depositor's input adds to the outbound that later spends it.
pub fn outbound_size_depositor() -> u64 {
    BYTES_PER_INPUT + BYTES_PER_WITNESS / WITNESS_SCALE_FACTOR
}

/// Fee in BTC charged to a depositor at `sat_per_vbyte`.
pub fn depositor_fee(sat_per_vbyte: u64) -> f64 {
    (sat_per_vbyte * outbound_size_depositor()) as f64 / SATS_PER_BTC
}

/// Clamp an estimated size into `[OUTBOUND_BYTES_MIN, OUTBOUND_BYTES_MAX]`.
pub fn clamp_outbound_size(size: u64) -> u64 {
    size.clamp(OUTBOUND_BYTES_MIN, OUTBOUND_BYTES_MAX)
}

/// Convert a BTC/kB rate, as node RPCs report it, into whole sat/vB.
pub fn fee_rate_to_sat_per_vbyte(btc_per_kb: f64) -> Result<u64> {
    if !(btc_per_kb > 0.0) {
        return Err(BitcoinError::InvalidFeeRate(format!("{} BTC/kB", btc_per_kb)));
    }
    let sat_per_kb = btc_per_kb * SATS_PER_BTC;
    Ok((sat_per_kb / BYTES_PER_KB) as u64)
}

/// Convert a BTC/kB relay floor into sat/vB, rounding up so that any rate
/// at or above the result clears the floor.
pub fn min_relay_sat_per_vbyte(btc_per_kb: f64) -> Result<u64> {
    if !(btc_per_kb > 0.0) {
        return Err(BitcoinError::InvalidFeeRate(format!(
            "relay fee {} BTC/kB",
            btc_per_kb
        )));
    }
    let sat_per_vbyte = (btc_per_kb * SATS_PER_BTC / BYTES_PER_KB).ceil();
    Ok(sat_per_vbyte.max(1.0) as u64)
}
