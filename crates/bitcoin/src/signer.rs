//! Bitcoin Outbound Signer
//!
//! Builds, signs and broadcasts withdrawals from the TSS address, and
//! replaces them with a higher-fee copy once they get stuck.
//!
//! # Withdrawal layout
//!
//! Inputs: the nonce mark left by the previous outbound, then the smallest
//! UTXOs that cover the payment, a worst-case fee and [`RESERVED_RBF_FEES`].
//!
//! Outputs, in order:
//! 1. nonce mark for this nonce, back to the TSS address
//! 2. payment, absent for cancelled outbounds
//! 3. change back to the TSS address, absent when it would be dust
//!
//! All inputs are signed in one keysign round attributed to the outbound's
//! nonce.

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::ecdsa;
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    absolute, Address, Amount, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use common::observability::{fields, EventType, LogEvent};
use common::{BitcoinConfig, ScheduledTask, TaskError, Tick, Ticker, TickerError};
use threshold_crypto::PubKey;
use threshold_types::{ChainId, Digest, LedgerClient, SigningError, TssSigner};

use crate::cpfp::{CpfpFeeBumper, CpfpPlan, FeeBump};
use crate::error::{BitcoinError, Result};
use crate::fee::{
    clamp_outbound_size, estimate_outbound_size, min_relay_sat_per_vbyte, nonce_mark_amount,
    DUST_THRESHOLD, OUTBOUND_BYTES_MAX, RESERVED_RBF_FEES,
};
use crate::mempool::{is_tx_stuck_in_mempool, PendingStatus};
use crate::outbound::{OutboundData, OutboundParams};
use crate::rpc::BitcoinRpc;
use crate::utxo::select_utxos;

/// Signals replaceability on the first input.
const RBF_SEQUENCE: Sequence = Sequence(1);

/// Broadcast outbounds kept per signer, counted back from the newest nonce.
const OUTBOUND_HISTORY: u64 = 100;

/// The last outbound found stuck in the mempool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StuckOutbound {
    pub nonce: u64,
    pub txid: Txid,
    pub pending_for: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundOutcome {
    Broadcast { txid: Txid },
    Bumped { txid: Txid, additional_fees: u64 },
    /// Nothing sent; try again on a later pass.
    Held { reason: String },
    /// This nonce is already out and not stuck.
    AlreadyBroadcast { txid: Txid },
}

/// Builds, signs and broadcasts Bitcoin outbounds from the TSS address.
pub struct BitcoinOutboundSigner {
    /// Bitcoin node RPC
    rpc: Arc<dyn BitcoinRpc>,
    /// Threshold signer for input sighashes
    tss: Arc<dyn TssSigner>,
    /// Ledger that receives outbound trackers
    ledger: Arc<dyn LedgerClient>,
    /// Current TSS public key
    pubkey: PubKey,
    /// P2WPKH address of `pubkey`; change goes back here
    tss_address: Address,
    chain_id: ChainId,
    config: BitcoinConfig,
    /// Recent outbound txids by nonce
    outbounds: RwLock<BTreeMap<u64, Txid>>,
    /// Latest stuck outbound seen by the watcher
    last_stuck: RwLock<Option<StuckOutbound>>,
}

impl BitcoinOutboundSigner {
    /// Create a new Bitcoin outbound signer
    ///
    /// # Arguments
    /// * `rpc` - Bitcoin node RPC client
    /// * `tss` - Threshold signer
    /// * `ledger` - Ledger client for outbound trackers
    /// * `pubkey` - Current TSS public key
    /// * `config` - Bitcoin settings; `chain_id` selects the network
    ///
    /// # Errors
    /// Fails when `pubkey` has no address on the configured chain.
    pub fn new(
        rpc: Arc<dyn BitcoinRpc>,
        tss: Arc<dyn TssSigner>,
        ledger: Arc<dyn LedgerClient>,
        pubkey: PubKey,
        config: BitcoinConfig,
    ) -> Result<Self> {
        let chain_id = ChainId(config.chain_id);
        let tss_address = pubkey.btc_address(chain_id)?;

        info!(chain_id = %chain_id, address = %tss_address, "Bitcoin outbound signer ready");

        Ok(Self {
            rpc,
            tss,
            ledger,
            pubkey,
            tss_address,
            chain_id,
            config,
            outbounds: RwLock::new(BTreeMap::new()),
            last_stuck: RwLock::new(None),
        })
    }

    pub fn tss_address(&self) -> &Address {
        &self.tss_address
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn rpc(&self) -> &Arc<dyn BitcoinRpc> {
        &self.rpc
    }

    pub fn config(&self) -> &BitcoinConfig {
        &self.config
    }

    /// Remember the transaction sent for `nonce`. Observers call this for
    /// outbounds found on chain as well.
    pub async fn record_outbound(&self, nonce: u64, txid: Txid) {
        let mut outbounds = self.outbounds.write().await;
        outbounds.insert(nonce, txid);
        if let Some(&newest) = outbounds.keys().next_back() {
            outbounds.retain(|n, _| n + OUTBOUND_HISTORY > newest);
        }
    }

    pub async fn outbound_txid(&self, nonce: u64) -> Option<Txid> {
        self.outbounds.read().await.get(&nonce).copied()
    }

    /// Highest nonce sent so far.
    pub async fn latest_outbound(&self) -> Option<(u64, Txid)> {
        self.outbounds
            .read()
            .await
            .iter()
            .next_back()
            .map(|(n, t)| (*n, *t))
    }

    pub async fn last_stuck_outbound(&self) -> Option<StuckOutbound> {
        self.last_stuck.read().await.clone()
    }

    pub async fn set_last_stuck_outbound(&self, stuck: Option<StuckOutbound>) {
        *self.last_stuck.write().await = stuck;
    }

    /// Append nonce-mark, payment and change outputs.
    ///
    /// `total` is the value of all inputs. A change equal to the nonce mark
    /// is reduced by one sat so observers never mistake it for the mark.
    pub fn add_withdraw_tx_outputs(
        &self,
        tx: &mut Transaction,
        to: &Address,
        total: u64,
        amount: u64,
        nonce_mark: u64,
        fees: u64,
        cancel_tx: bool,
    ) -> Result<()> {
        let amount = if cancel_tx { 0 } else { amount };

        let spent = amount as i128 + fees as i128 + nonce_mark as i128;
        let mut remaining = total as i128 - spent;
        if remaining < 0 {
            return Err(BitcoinError::NegativeRemainder(
                i64::try_from(remaining).unwrap_or(i64::MIN),
            ));
        }
        if remaining == nonce_mark as i128 {
            remaining -= 1;
        }
        let remaining = remaining as u64;

        let tss_script = self.tss_address.script_pubkey();
        tx.output.push(TxOut {
            value: Amount::from_sat(nonce_mark),
            script_pubkey: tss_script.clone(),
        });

        if !cancel_tx {
            tx.output.push(TxOut {
                value: Amount::from_sat(amount),
                script_pubkey: to.script_pubkey(),
            });
        }

        if remaining >= DUST_THRESHOLD {
            tx.output.push(TxOut {
                value: Amount::from_sat(remaining),
                script_pubkey: tss_script,
            });
        } else if remaining > 0 {
            debug!(remaining_sats = remaining, "Dust change left to fees");
        }

        Ok(())
    }

    /// Build and sign a fresh withdrawal for `data`.
    pub async fn sign_withdraw_tx(
        &self,
        ctx: &CancellationToken,
        data: &OutboundData,
    ) -> Result<Transaction> {
        // Always a fresh view; another round may have spent what we saw last.
        let utxos = self.rpc.list_unspent(&self.tss_address).await?;

        let prev_outbound = match data.nonce {
            0 => None,
            n => self.outbound_txid(n - 1).await,
        };

        let nonce_mark = nonce_mark_amount(data.nonce);
        let estimated_fee = data.fee_rate * OUTBOUND_BYTES_MAX;
        let target = data.amount_sats + estimated_fee + RESERVED_RBF_FEES + nonce_mark;

        let selection = select_utxos(
            &utxos,
            target,
            self.config.max_inputs_per_tx,
            data.nonce,
            prev_outbound.as_ref(),
        )?;

        let mut tx = Transaction {
            // Version 1 keeps the RBF sequence from acting as a relative lock.
            version: Version::ONE,
            lock_time: absolute::LockTime::ZERO,
            input: Vec::with_capacity(selection.utxos.len()),
            output: Vec::with_capacity(3),
        };
        for (i, utxo) in selection.utxos.iter().enumerate() {
            tx.input.push(TxIn {
                previous_output: utxo.outpoint(),
                script_sig: ScriptBuf::new(),
                sequence: if i == 0 { RBF_SEQUENCE } else { Sequence::MAX },
                witness: Witness::new(),
            });
        }

        let size = estimate_outbound_size(
            selection.utxos.len() as u64,
            std::slice::from_ref(&data.to),
        )?;
        let size = clamp_outbound_size(size);
        let fees = size * data.fee_rate;

        self.add_withdraw_tx_outputs(
            &mut tx,
            &data.to,
            selection.total_sats,
            data.amount_sats,
            nonce_mark,
            fees,
            data.cancel_tx,
        )?;

        let amounts: Vec<u64> = selection.utxos.iter().map(|u| u.amount_sats).collect();
        self.sign_tx(ctx, &mut tx, &amounts, data.height, data.nonce)
            .await?;

        info!(
            nonce = data.nonce,
            inputs = tx.input.len(),
            size,
            fee_rate = data.fee_rate,
            fees,
            cancel = data.cancel_tx,
            "Signed withdraw tx"
        );
        Ok(tx)
    }

    /// Fee-bump the stuck transaction for `data.nonce` and sign the
    /// replacement.
    pub async fn sign_rbf_tx(
        &self,
        ctx: &CancellationToken,
        stuck_tx: Transaction,
        data: &OutboundData,
    ) -> Result<FeeBump> {
        let plan = CpfpPlan::fetch(
            self.rpc.as_ref(),
            stuck_tx,
            data.fee_rate_latest,
            data.min_relay_fee,
        )
        .await?;
        let mut bump = CpfpFeeBumper::new(plan).bump_fee()?;

        let mut amounts = Vec::with_capacity(bump.tx.input.len());
        for input in &bump.tx.input {
            let prev = self
                .rpc
                .get_raw_transaction(&input.previous_output.txid)
                .await?;
            let output = prev
                .output
                .get(input.previous_output.vout as usize)
                .ok_or_else(|| {
                    BitcoinError::InvalidTransaction(format!(
                        "input {} spends a missing output",
                        input.previous_output
                    ))
                })?;
            amounts.push(output.value.to_sat());
        }

        self.sign_tx(ctx, &mut bump.tx, &amounts, data.height, data.nonce)
            .await?;
        Ok(bump)
    }

    /// Sign every P2WPKH input of `tx` in one keysign round.
    async fn sign_tx(
        &self,
        ctx: &CancellationToken,
        tx: &mut Transaction,
        input_amounts: &[u64],
        height: u64,
        nonce: u64,
    ) -> Result<()> {
        if tx.input.len() != input_amounts.len() {
            return Err(BitcoinError::InvalidTransaction(format!(
                "{} inputs but {} amounts",
                tx.input.len(),
                input_amounts.len()
            )));
        }

        let script = self.tss_address.script_pubkey();
        let digests = {
            let mut cache = SighashCache::new(&*tx);
            let mut digests: Vec<Digest> = Vec::with_capacity(input_amounts.len());
            for (i, amount) in input_amounts.iter().enumerate() {
                let sighash = cache
                    .p2wpkh_signature_hash(
                        i,
                        &script,
                        Amount::from_sat(*amount),
                        EcdsaSighashType::All,
                    )
                    .map_err(|e| BitcoinError::Sighash(format!("input {}: {}", i, e)))?;
                digests.push(sighash.to_byte_array());
            }
            digests
        };

        let signatures = self
            .tss
            .sign_batch(ctx, &digests, height, nonce, self.chain_id)
            .await?;
        if signatures.len() != digests.len() {
            return Err(SigningError::Protocol(format!(
                "expected {} signatures, got {}",
                digests.len(),
                signatures.len()
            ))
            .into());
        }

        let pubkey = self.pubkey.compressed();
        for (input, signature) in tx.input.iter_mut().zip(&signatures) {
            let mut sig = ecdsa::Signature::from_compact(signature.compact())
                .map_err(|e| SigningError::Protocol(format!("malformed signature: {}", e)))?;
            sig.normalize_s();

            let mut der = sig.serialize_der().to_vec();
            der.push(EcdsaSighashType::All.to_u32() as u8);

            let mut witness = Witness::new();
            witness.push(der);
            witness.push(pubkey);
            input.witness = witness;
        }

        Ok(())
    }

    /// Send `tx`, retrying with exponential backoff, then report it to the
    /// ledger as the outbound for `nonce`.
    pub async fn broadcast(
        &self,
        ctx: &CancellationToken,
        tx: &Transaction,
        nonce: u64,
    ) -> Result<Txid> {
        let attempts = self.config.broadcast_retries.max(1);
        let mut backoff = self.config.broadcast_backoff();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.rpc.send_raw_transaction(tx).await {
                Ok(txid) => {
                    info!(nonce, %txid, attempt, "Broadcast outbound");
                    LogEvent::new(EventType::OutboundBroadcast)
                        .with_correlation_id(txid.to_string())
                        .with_context(fields::CHAIN_ID, self.chain_id)
                        .with_context(fields::NONCE, nonce)
                        .emit();

                    self.record_outbound(nonce, txid).await;

                    // Observers pick the tx up from the chain if this fails.
                    if let Err(e) = self
                        .ledger
                        .add_outbound_tracker(self.chain_id, nonce, &txid.to_string())
                        .await
                    {
                        error!(nonce, %txid, error = %e, "Failed to add outbound tracker");
                    }
                    return Ok(txid);
                }
                Err(e) => {
                    warn!(nonce, attempt, error = %e, "Broadcast failed");
                    last_error = e.to_string();
                }
            }

            if attempt < attempts {
                tokio::select! {
                    _ = ctx.cancelled() => return Err(BitcoinError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff *= 2;
            }
        }

        Err(BitcoinError::Broadcast {
            attempts,
            last: last_error,
        })
    }

    /// Sign and send the outbound described by `params`.
    ///
    /// When the previous attempt for the same nonce is stuck and the ledger
    /// has raised its rate, the stuck transaction is fee-bumped instead.
    pub async fn process_outbound(
        &self,
        ctx: &CancellationToken,
        params: &OutboundParams,
        height: u64,
    ) -> Result<OutboundOutcome> {
        let relay_fee = self.rpc.get_network_relay_fee().await?;
        let min_relay_fee = min_relay_sat_per_vbyte(relay_fee)?;
        let data = OutboundData::new(params, height, min_relay_fee)?;

        let stuck = self
            .last_stuck_outbound()
            .await
            .filter(|s| s.nonce == data.nonce);

        if let Some(stuck) = stuck {
            return self.bump_stuck_outbound(ctx, &stuck, &data).await;
        }

        if let Some(txid) = self.outbound_txid(data.nonce).await {
            debug!(nonce = data.nonce, %txid, "Outbound already broadcast");
            return Ok(OutboundOutcome::AlreadyBroadcast { txid });
        }

        let tx = self.sign_withdraw_tx(ctx, &data).await?;
        let txid = self.broadcast(ctx, &tx, data.nonce).await?;
        Ok(OutboundOutcome::Broadcast { txid })
    }

    async fn bump_stuck_outbound(
        &self,
        ctx: &CancellationToken,
        stuck: &StuckOutbound,
        data: &OutboundData,
    ) -> Result<OutboundOutcome> {
        if !data.fee_rate_bumped {
            return Ok(self.hold(
                stuck,
                "waiting for the ledger to raise the fee rate".to_string(),
            ));
        }

        let stuck_tx = self.rpc.get_raw_transaction(&stuck.txid).await?;
        let bump = match self.sign_rbf_tx(ctx, stuck_tx, data).await {
            Ok(bump) => bump,
            Err(e) if e.is_hold() => return Ok(self.hold(stuck, e.to_string())),
            Err(e) => return Err(e),
        };

        let txid = self.broadcast(ctx, &bump.tx, data.nonce).await?;
        self.set_last_stuck_outbound(None).await;

        LogEvent::new(EventType::FeeBumped)
            .with_correlation_id(txid.to_string())
            .with_context(fields::NONCE, data.nonce)
            .with_context("replaced", stuck.txid)
            .with_context("additional_fees", bump.additional_fees)
            .with_context("new_fee_rate", bump.new_fee_rate)
            .emit();

        Ok(OutboundOutcome::Bumped {
            txid,
            additional_fees: bump.additional_fees,
        })
    }

    fn hold(&self, stuck: &StuckOutbound, reason: String) -> OutboundOutcome {
        LogEvent::new(EventType::FeeBumpHeld)
            .with_correlation_id(stuck.txid.to_string())
            .with_context(fields::NONCE, stuck.nonce)
            .with_context("reason", &reason)
            .emit();
        OutboundOutcome::Held { reason }
    }
}

/// Periodically checks whether the newest outbound is stuck and keeps the
/// signer's last-stuck record current.
pub struct StuckOutboundWatcher {
    signer: Arc<BitcoinOutboundSigner>,
}

impl StuckOutboundWatcher {
    pub fn new(signer: Arc<BitcoinOutboundSigner>) -> Self {
        Self { signer }
    }

    pub async fn run(mut self, ctx: &CancellationToken) -> std::result::Result<(), TickerError> {
        let ticker = Ticker::new(
            "btc_stuck_outbound",
            self.signer.config().stuck_check_interval(),
        )?;
        ticker.run(ctx, &mut self).await
    }
}

#[async_trait]
impl ScheduledTask for StuckOutboundWatcher {
    type Error = BitcoinError;

    async fn tick(
        &mut self,
        _ctx: &CancellationToken,
    ) -> std::result::Result<Tick, TaskError<BitcoinError>> {
        let Some((nonce, txid)) = self.signer.latest_outbound().await else {
            return Ok(Tick::Continue);
        };

        let status = is_tx_stuck_in_mempool(
            self.signer.rpc().as_ref(),
            &txid,
            self.signer.config().fee_bump_wait_blocks,
        )
        .await
        .map_err(TaskError::Transient)?;

        let previous = self.signer.last_stuck_outbound().await;
        match status {
            PendingStatus::Stuck(pending_for) => {
                if previous.as_ref().map(|s| s.txid) != Some(txid) {
                    LogEvent::new(EventType::OutboundStuck)
                        .with_correlation_id(txid.to_string())
                        .with_context(fields::NONCE, nonce)
                        .with_duration(pending_for)
                        .emit();
                }
                self.signer
                    .set_last_stuck_outbound(Some(StuckOutbound {
                        nonce,
                        txid,
                        pending_for,
                    }))
                    .await;
            }
            PendingStatus::NotInMempool => {
                if previous.is_some_and(|s| s.txid == txid) {
                    info!(nonce, %txid, "Stuck outbound left the mempool");
                    self.signer.set_last_stuck_outbound(None).await;
                }
            }
            PendingStatus::Pending(pending_for) => {
                debug!(nonce, %txid, ?pending_for, "Outbound pending");
            }
        }

        Ok(Tick::Continue)
    }
}
