//! Hand-written collaborators for Bitcoin signer tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{ecdsa, Message, PublicKey, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    absolute, Address, Amount, OutPoint, ScriptBuf, Transaction, TxIn, TxOut, Txid,
};
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use threshold_bitcoin::{BitcoinError, BitcoinRpc, MempoolEntry, Utxo};
use threshold_crypto::PubKey;
use threshold_types::{
    BlameRecord, ChainId, Digest, KeygenTask, LedgerClient, LedgerError, ReceiveStatus,
    Signature65, SigningError, TssRecord, TssSigner,
};

pub fn txid(seed: u8) -> Txid {
    Txid::from_byte_array([seed; 32])
}

pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_slice(&[seed; 32]).unwrap()
}

pub fn pubkey_of(key: &SigningKey) -> PubKey {
    let point = key.verifying_key().to_encoded_point(true);
    PubKey::from_sec1_bytes(point.as_bytes()).unwrap()
}

/// A confirmed transaction paying `amounts` to `script`.
pub fn funding_tx(seed: u8, script: &ScriptBuf, amounts: &[u64]) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: absolute::LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint {
                txid: txid(seed),
                vout: 0,
            },
            ..TxIn::default()
        }],
        output: amounts
            .iter()
            .map(|a| TxOut {
                value: Amount::from_sat(*a),
                script_pubkey: script.clone(),
            })
            .collect(),
    }
}

/// Check every input's witness signs its P2WPKH sighash with `pubkey`.
pub fn assert_witnesses_valid(tx: &Transaction, script: &ScriptBuf, amounts: &[u64], pubkey: &PubKey) {
    let secp = Secp256k1::verification_only();
    let expected_pk = PublicKey::from_slice(&pubkey.compressed()).unwrap();
    let mut cache = SighashCache::new(tx);

    for (i, amount) in amounts.iter().enumerate() {
        let witness = &tx.input[i].witness;
        assert_eq!(witness.len(), 2, "input {} witness items", i);

        let sig_bytes = &witness[0];
        assert_eq!(
            *sig_bytes.last().unwrap(),
            EcdsaSighashType::All.to_u32() as u8
        );
        let sig = ecdsa::Signature::from_der(&sig_bytes[..sig_bytes.len() - 1]).unwrap();
        assert_eq!(PublicKey::from_slice(&witness[1]).unwrap(), expected_pk);

        let sighash = cache
            .p2wpkh_signature_hash(i, script, Amount::from_sat(*amount), EcdsaSighashType::All)
            .unwrap();
        secp.verify_ecdsa(
            &Message::from_digest(sighash.to_byte_array()),
            &sig,
            &expected_pk,
        )
        .unwrap();
    }
}

pub fn output_values(tx: &Transaction) -> Vec<u64> {
    tx.output.iter().map(|o| o.value.to_sat()).collect()
}

/// Scriptable Bitcoin node.
pub struct MockBitcoinRpc {
    block_count: AtomicU64,
    smart_fee: Mutex<f64>,
    relay_fee: Mutex<f64>,
    mempool: Mutex<HashMap<Txid, MempoolEntry>>,
    raw_txs: Mutex<HashMap<Txid, Transaction>>,
    utxos: Mutex<Vec<Utxo>>,
    send_failures: AtomicUsize,
    sent: Mutex<Vec<Transaction>>,
    list_unspent_calls: AtomicUsize,
}

impl MockBitcoinRpc {
    pub fn new() -> Self {
        Self {
            block_count: AtomicU64::new(100),
            smart_fee: Mutex::new(0.0002),
            relay_fee: Mutex::new(0.00001),
            mempool: Mutex::new(HashMap::new()),
            raw_txs: Mutex::new(HashMap::new()),
            utxos: Mutex::new(Vec::new()),
            send_failures: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            list_unspent_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_block_count(&self, count: u64) {
        self.block_count.store(count, Ordering::SeqCst);
    }

    /// BTC/kB
    pub fn set_smart_fee(&self, rate: f64) {
        *self.smart_fee.lock().unwrap() = rate;
    }

    pub fn set_relay_fee(&self, rate: f64) {
        *self.relay_fee.lock().unwrap() = rate;
    }

    pub fn set_mempool_entry(&self, txid: Txid, entry: MempoolEntry) {
        self.mempool.lock().unwrap().insert(txid, entry);
    }

    pub fn remove_mempool_entry(&self, txid: &Txid) {
        self.mempool.lock().unwrap().remove(txid);
    }

    pub fn add_raw_tx(&self, tx: Transaction) -> Txid {
        let txid = tx.compute_txid();
        self.raw_txs.lock().unwrap().insert(txid, tx);
        txid
    }

    pub fn add_utxo(&self, utxo: Utxo) {
        self.utxos.lock().unwrap().push(utxo);
    }

    /// Register a funding transaction and expose all its outputs as UTXOs.
    pub fn fund(&self, seed: u8, script: &ScriptBuf, amounts: &[u64]) -> Transaction {
        let tx = funding_tx(seed, script, amounts);
        let txid = self.add_raw_tx(tx.clone());
        for (vout, amount) in amounts.iter().enumerate() {
            self.add_utxo(Utxo {
                txid,
                vout: vout as u32,
                amount_sats: *amount,
                script_pubkey: script.clone(),
                confirmations: 6,
            });
        }
        tx
    }

    /// Fail the next `n` broadcasts.
    pub fn fail_sends(&self, n: usize) {
        self.send_failures.store(n, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Transaction> {
        self.sent.lock().unwrap().clone()
    }

    pub fn list_unspent_calls(&self) -> usize {
        self.list_unspent_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BitcoinRpc for MockBitcoinRpc {
    async fn get_block_count(&self) -> Result<u64, BitcoinError> {
        Ok(self.block_count.load(Ordering::SeqCst))
    }

    async fn estimate_smart_fee(&self, _conf_target: u32) -> Result<f64, BitcoinError> {
        Ok(*self.smart_fee.lock().unwrap())
    }

    async fn get_network_relay_fee(&self) -> Result<f64, BitcoinError> {
        Ok(*self.relay_fee.lock().unwrap())
    }

    async fn get_mempool_entry(&self, txid: &Txid) -> Result<Option<MempoolEntry>, BitcoinError> {
        Ok(self.mempool.lock().unwrap().get(txid).cloned())
    }

    async fn get_raw_transaction(&self, txid: &Txid) -> Result<Transaction, BitcoinError> {
        self.raw_txs
            .lock()
            .unwrap()
            .get(txid)
            .cloned()
            .ok_or_else(|| BitcoinError::Rpc(format!("no such transaction {}", txid)))
    }

    async fn send_raw_transaction(&self, tx: &Transaction) -> Result<Txid, BitcoinError> {
        let failing = self
            .send_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BitcoinError::Rpc("connection refused".into()));
        }
        self.sent.lock().unwrap().push(tx.clone());
        Ok(self.add_raw_tx(tx.clone()))
    }

    async fn list_unspent(&self, _address: &Address) -> Result<Vec<Utxo>, BitcoinError> {
        self.list_unspent_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.utxos.lock().unwrap().clone())
    }
}

/// One recorded `sign_batch` call.
#[derive(Debug, Clone)]
pub struct SignCall {
    pub digests: Vec<Digest>,
    pub height: u64,
    pub nonce: u64,
    pub chain_id: ChainId,
}

/// Signs locally with a single key standing in for the TSS.
pub struct MockTss {
    key: SigningKey,
    fail: AtomicBool,
    calls: Mutex<Vec<SignCall>>,
}

impl MockTss {
    pub fn new(key: SigningKey) -> Self {
        Self {
            key,
            fail: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn pubkey(&self) -> PubKey {
        pubkey_of(&self.key)
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<SignCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TssSigner for MockTss {
    async fn sign(
        &self,
        ctx: &CancellationToken,
        digest: Digest,
        height: u64,
        nonce: u64,
        chain_id: ChainId,
    ) -> Result<Signature65, SigningError> {
        let mut signatures = self.sign_batch(ctx, &[digest], height, nonce, chain_id).await?;
        Ok(signatures.remove(0))
    }

    async fn sign_batch(
        &self,
        _ctx: &CancellationToken,
        digests: &[Digest],
        height: u64,
        nonce: u64,
        chain_id: ChainId,
    ) -> Result<Vec<Signature65>, SigningError> {
        self.calls.lock().unwrap().push(SignCall {
            digests: digests.to_vec(),
            height,
            nonce,
            chain_id,
        });
        if self.fail.load(Ordering::SeqCst) {
            return Err(SigningError::KeysignFailed {
                reason: "party timeout".into(),
                blamed: vec![],
            });
        }

        Ok(digests
            .iter()
            .map(|digest| {
                let (signature, recovery_id) = self.key.sign_prehash_recoverable(digest).unwrap();
                let bytes = signature.to_bytes();
                let mut r = [0u8; 32];
                let mut s = [0u8; 32];
                r.copy_from_slice(&bytes[..32]);
                s.copy_from_slice(&bytes[32..]);
                Signature65::from_parts(&r, &s, recovery_id.to_byte())
            })
            .collect())
    }
}

/// Ledger double that only records outbound trackers.
pub struct MockLedger {
    trackers: Mutex<Vec<(ChainId, u64, String)>>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            trackers: Mutex::new(Vec::new()),
        }
    }

    pub fn trackers(&self) -> Vec<(ChainId, u64, String)> {
        self.trackers.lock().unwrap().clone()
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    fn chain_id(&self) -> ChainId {
        ChainId::ZETA_PRIVNET
    }

    async fn get_keygen(&self) -> Result<KeygenTask, LedgerError> {
        Err(LedgerError::NotFound("keygen".into()))
    }

    async fn get_tss(&self) -> Result<TssRecord, LedgerError> {
        Err(LedgerError::NotFound("tss".into()))
    }

    async fn get_tss_history(&self) -> Result<Vec<TssRecord>, LedgerError> {
        Ok(Vec::new())
    }

    async fn get_block_height(&self) -> Result<i64, LedgerError> {
        Ok(0)
    }

    async fn post_vote_tss(
        &self,
        _tss_pubkey: &str,
        _keygen_height: i64,
        _status: ReceiveStatus,
    ) -> Result<String, LedgerError> {
        Err(LedgerError::Broadcast("not supported".into()))
    }

    async fn post_vote_blame_data(
        &self,
        _blame: &BlameRecord,
        _chain_id: ChainId,
        _index: &str,
    ) -> Result<String, LedgerError> {
        Err(LedgerError::Broadcast("not supported".into()))
    }

    async fn add_outbound_tracker(
        &self,
        chain_id: ChainId,
        nonce: u64,
        tx_hash: &str,
    ) -> Result<String, LedgerError> {
        self.trackers
            .lock()
            .unwrap()
            .push((chain_id, nonce, tx_hash.to_string()));
        Ok("tracker".into())
    }
}
