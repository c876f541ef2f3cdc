//! Hand-written collaborators for orchestrator integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::prelude::*;
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use threshold_crypto::PubKey;
use threshold_orchestrator::{Keystore, OrchestrationError};
use threshold_types::{
    Blame, BlameNode, BlameRecord, ChainId, KeyGenerator, KeySigner, KeySignerError,
    KeygenRequest, KeygenResponse, KeygenStatus, KeygenTask, KeysignRequest, KeysignResponse,
    LedgerClient, LedgerError, PeerError, PeerId, PeerNetwork, ReceiveStatus, Status, TssRecord,
    WireSignature,
};

pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_slice(&[seed; 32]).unwrap()
}

pub fn pubkey_of(key: &SigningKey) -> PubKey {
    let point = key.verifying_key().to_encoded_point(true);
    PubKey::from_sec1_bytes(point.as_bytes()).unwrap()
}

/// Calls seen across several mocks, in order.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Index of the first entry starting with `prefix`.
    pub fn first(&self, prefix: &str) -> Option<usize> {
        self.entries().iter().position(|e| e.starts_with(prefix))
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

/// How the mock signer answers a keysign request.
#[derive(Debug, Clone)]
pub enum SignerMode {
    Honest,
    /// Ceremony reports failure with blame.
    Fail { reason: String, blamed: Vec<String> },
    /// Signs with another key.
    WrongKey,
    /// Omits the last signature.
    DropLast,
    /// Transport error.
    Unavailable,
}

/// A keysign black box that produces real recoverable signatures.
pub struct MockKeySigner {
    key: SigningKey,
    wrong_key: SigningKey,
    mode: Mutex<SignerMode>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    requests: Mutex<Vec<KeysignRequest>>,
}

impl MockKeySigner {
    pub fn new(key: SigningKey) -> Self {
        Self::with_delay(key, Duration::ZERO)
    }

    pub fn with_delay(key: SigningKey, delay: Duration) -> Self {
        Self {
            key,
            wrong_key: signing_key(0x42),
            mode: Mutex::new(SignerMode::Honest),
            delay,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn pubkey(&self) -> PubKey {
        pubkey_of(&self.key)
    }

    pub fn set_mode(&self, mode: SignerMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping `key_sign` calls seen.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<KeysignRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn sign_message(key: &SigningKey, msg: &str) -> WireSignature {
        let digest = BASE64_STANDARD.decode(msg).unwrap();
        let (signature, recovery_id) = key.sign_prehash_recoverable(&digest).unwrap();
        WireSignature {
            msg: msg.to_string(),
            r: BASE64_STANDARD.encode(signature.r().to_bytes()),
            s: BASE64_STANDARD.encode(signature.s().to_bytes()),
            recovery_id: BASE64_STANDARD.encode([recovery_id.to_byte()]),
        }
    }
}

#[async_trait]
impl KeySigner for MockKeySigner {
    async fn key_sign(&self, request: KeysignRequest) -> Result<KeysignResponse, KeySignerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let mode = self.mode.lock().unwrap().clone();
        let response = match mode {
            SignerMode::Honest => Ok(KeysignResponse {
                status: Status::Success,
                signatures: request
                    .messages
                    .iter()
                    .map(|m| Self::sign_message(&self.key, m))
                    .collect(),
                blame: Blame::default(),
            }),
            SignerMode::WrongKey => Ok(KeysignResponse {
                status: Status::Success,
                signatures: request
                    .messages
                    .iter()
                    .map(|m| Self::sign_message(&self.wrong_key, m))
                    .collect(),
                blame: Blame::default(),
            }),
            SignerMode::DropLast => {
                let mut signatures: Vec<_> = request
                    .messages
                    .iter()
                    .map(|m| Self::sign_message(&self.key, m))
                    .collect();
                signatures.pop();
                Ok(KeysignResponse {
                    status: Status::Success,
                    signatures,
                    blame: Blame::default(),
                })
            }
            SignerMode::Fail { reason, blamed } => Ok(KeysignResponse {
                status: Status::Fail,
                signatures: Vec::new(),
                blame: Blame::new(
                    reason,
                    blamed.into_iter().map(|pubkey| BlameNode { pubkey }).collect(),
                ),
            }),
            SignerMode::Unavailable => Err(KeySignerError::Unavailable("connection refused".into())),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

/// Ledger double that records every write.
pub struct MockLedger {
    chain_id: ChainId,
    keygen: Mutex<KeygenTask>,
    height: AtomicI64,
    tss: Mutex<TssRecord>,
    history: Mutex<Vec<TssRecord>>,
    keygen_read_failures: AtomicUsize,
    keygen_reads: AtomicUsize,
    fail_votes: AtomicBool,
    journal: Journal,
    pub votes: Mutex<Vec<(String, i64, ReceiveStatus)>>,
    pub blames: Mutex<Vec<(BlameRecord, ChainId, String)>>,
    pub trackers: Mutex<Vec<(ChainId, u64, String)>>,
}

impl MockLedger {
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            keygen: Mutex::new(KeygenTask {
                status: KeygenStatus::Pending,
                granted_pubkeys: Vec::new(),
                block_number: 0,
            }),
            height: AtomicI64::new(0),
            tss: Mutex::new(TssRecord {
                tss_pubkey: String::new(),
                tss_participant_list: Vec::new(),
                finalized_zeta_height: 0,
                keygen_zeta_height: 0,
            }),
            history: Mutex::new(Vec::new()),
            keygen_read_failures: AtomicUsize::new(0),
            keygen_reads: AtomicUsize::new(0),
            fail_votes: AtomicBool::new(false),
            journal: Journal::default(),
            votes: Mutex::new(Vec::new()),
            blames: Mutex::new(Vec::new()),
            trackers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    pub fn set_keygen(&self, status: KeygenStatus, block_number: i64, granted: &[&str]) {
        *self.keygen.lock().unwrap() = KeygenTask {
            status,
            granted_pubkeys: granted.iter().map(|s| s.to_string()).collect(),
            block_number,
        };
    }

    pub fn set_height(&self, height: i64) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn set_tss(&self, record: TssRecord) {
        *self.tss.lock().unwrap() = record;
    }

    pub fn set_history(&self, history: Vec<TssRecord>) {
        *self.history.lock().unwrap() = history;
    }

    /// Fail the next `n` keygen reads.
    pub fn fail_keygen_reads(&self, n: usize) {
        self.keygen_read_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_votes(&self, fail: bool) {
        self.fail_votes.store(fail, Ordering::SeqCst);
    }

    pub fn keygen_reads(&self) -> usize {
        self.keygen_reads.load(Ordering::SeqCst)
    }

    pub fn votes(&self) -> Vec<(String, i64, ReceiveStatus)> {
        self.votes.lock().unwrap().clone()
    }

    pub fn blames(&self) -> Vec<(BlameRecord, ChainId, String)> {
        self.blames.lock().unwrap().clone()
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn get_keygen(&self) -> Result<KeygenTask, LedgerError> {
        self.keygen_reads.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .keygen_read_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LedgerError::Rpc("connection reset".into()));
        }
        Ok(self.keygen.lock().unwrap().clone())
    }

    async fn get_tss(&self) -> Result<TssRecord, LedgerError> {
        self.journal.record("get_tss");
        Ok(self.tss.lock().unwrap().clone())
    }

    async fn get_tss_history(&self) -> Result<Vec<TssRecord>, LedgerError> {
        self.journal.record("get_tss_history");
        Ok(self.history.lock().unwrap().clone())
    }

    async fn get_block_height(&self) -> Result<i64, LedgerError> {
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn post_vote_tss(
        &self,
        tss_pubkey: &str,
        keygen_height: i64,
        status: ReceiveStatus,
    ) -> Result<String, LedgerError> {
        self.journal.record("vote_tss");
        if self.fail_votes.load(Ordering::SeqCst) {
            return Err(LedgerError::Broadcast("out of gas".into()));
        }
        let mut votes = self.votes.lock().unwrap();
        votes.push((tss_pubkey.to_string(), keygen_height, status));
        Ok(format!("vote-{}", votes.len()))
    }

    async fn post_vote_blame_data(
        &self,
        blame: &BlameRecord,
        chain_id: ChainId,
        index: &str,
    ) -> Result<String, LedgerError> {
        let mut blames = self.blames.lock().unwrap();
        blames.push((blame.clone(), chain_id, index.to_string()));
        Ok(format!("blame-{}", blames.len()))
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
        Ok("tracker".to_string())
    }
}

/// Keygen black box answering from a script; falls back to `default`.
pub struct MockGenerator {
    script: Mutex<VecDeque<Result<KeygenResponse, KeySignerError>>>,
    default: KeygenResponse,
    calls: AtomicUsize,
    requests: Mutex<Vec<KeygenRequest>>,
    journal: Journal,
}

impl MockGenerator {
    /// Always succeeds with `pubkey`.
    pub fn succeeding(pubkey: &PubKey) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default: KeygenResponse {
                pub_key: pubkey.bech32().to_string(),
                status: Status::Success,
                blame: Blame::default(),
            },
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            journal: Journal::default(),
        }
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    pub fn push(&self, response: Result<KeygenResponse, KeySignerError>) {
        self.script.lock().unwrap().push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<KeygenRequest> {
        self.requests.lock().unwrap().clone()
    }
}

pub fn failed_keygen(reason: &str, blamed: &[&str]) -> KeygenResponse {
    KeygenResponse {
        pub_key: String::new(),
        status: Status::Fail,
        blame: Blame::new(
            reason,
            blamed
                .iter()
                .map(|p| BlameNode {
                    pubkey: p.to_string(),
                })
                .collect(),
        ),
    }
}

#[async_trait]
impl KeyGenerator for MockGenerator {
    async fn keygen(&self, request: KeygenRequest) -> Result<KeygenResponse, KeySignerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.journal.record("keygen");
        self.requests.lock().unwrap().push(request);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(self.default.clone()))
    }
}

#[derive(Debug, Clone)]
pub enum PingBehavior {
    Rtt(Duration),
    Fail,
    Hang,
    Panic,
}

/// Transport double. Operator pubkeys resolve to peer IDs through an
/// explicit table; anything not in it is rejected.
pub struct MockPeerNetwork {
    local: PeerId,
    peers: HashMap<PeerId, PingBehavior>,
    peer_ids: Mutex<HashMap<String, PeerId>>,
    connected: AtomicUsize,
    pings: Mutex<Vec<PeerId>>,
    journal: Journal,
}

impl MockPeerNetwork {
    pub fn new(local: &str, peers: Vec<(&str, PingBehavior)>) -> Self {
        Self {
            local: PeerId::from(local),
            peers: peers
                .into_iter()
                .map(|(p, b)| (PeerId::from(p), b))
                .collect(),
            peer_ids: Mutex::new(HashMap::new()),
            connected: AtomicUsize::new(0),
            pings: Mutex::new(Vec::new()),
            journal: Journal::default(),
        }
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    /// Make `pubkey` resolve to `peer`.
    pub fn register(&self, pubkey: &str, peer: &str) {
        self.peer_ids
            .lock()
            .unwrap()
            .insert(pubkey.to_string(), PeerId::from(peer));
    }

    pub fn set_connected(&self, n: usize) {
        self.connected.store(n, Ordering::SeqCst);
    }

    pub fn pinged(&self) -> Vec<PeerId> {
        self.pings.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeerNetwork for MockPeerNetwork {
    fn local_peer(&self) -> PeerId {
        self.local.clone()
    }

    fn peer_id_for_pubkey(&self, bech32_pubkey: &str) -> Result<PeerId, PeerError> {
        self.journal.record(format!("peer_id:{}", bech32_pubkey));
        self.peer_ids
            .lock()
            .unwrap()
            .get(bech32_pubkey)
            .cloned()
            .ok_or_else(|| PeerError::InvalidPubkey(bech32_pubkey.to_string()))
    }

    async fn ping(&self, peer: &PeerId) -> Result<Duration, PeerError> {
        self.journal.record(format!("ping:{}", peer));
        self.pings.lock().unwrap().push(peer.clone());
        match self.peers.get(peer).cloned() {
            Some(PingBehavior::Rtt(rtt)) => Ok(rtt),
            Some(PingBehavior::Fail) | None => Err(PeerError::Unreachable(peer.to_string())),
            Some(PingBehavior::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Duration::from_secs(3600))
            }
            Some(PingBehavior::Panic) => panic!("ping handler crashed for {}", peer),
        }
    }

    fn connected_peer_count(&self) -> usize {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Keystore holding a fixed set of shares.
pub struct MockKeystore {
    shares: BTreeSet<String>,
    journal: Journal,
}

impl MockKeystore {
    pub fn new(shares: &[&str]) -> Self {
        Self {
            shares: shares.iter().map(|s| s.to_string()).collect(),
            journal: Journal::default(),
        }
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }
}

impl Keystore for MockKeystore {
    fn pubkeys(&self) -> Result<BTreeSet<String>, OrchestrationError> {
        self.journal.record("key_shares");
        Ok(self.shares.clone())
    }
}
