//! Keygen Ceremony
//!
//! Drives the multi-party key generation to completion exactly once.
//!
//! # States
//!
//! ```text
//! NotStarted -> Waiting(target) -> Performing -> VotedSuccess -> Done
//!                    ^                       \-> VotedFailed --+
//!                    +-------------------------------------------+
//! ```
//!
//! Each tick reads the keygen task from the ledger. A `Success` task ends the
//! ceremony for good; a `Pending` task is performed only when the ledger
//! height equals the task height. Ledger read errors are transient and are
//! retried on the next tick. An unknown task status and a vote that cannot
//! be cast are fatal.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use common::observability::{fields, EventType, LogEvent};
use common::{KeygenConfig, ScheduledTask, SigningConfig, TaskError, Tick, Ticker, TickerError};
use threshold_crypto::{keccak256, keygen_blame_index, CryptoError, PubKey};
use threshold_types::{
    BlameRecord, KeyGenerator, KeySigner, KeygenRequest, KeygenStatus, KeygenTask, LedgerClient,
    ReceiveStatus, Status, TssRecord,
};

use crate::error::KeygenError;
use crate::metrics;
use crate::signing_service::SigningService;

/// Payload signed once after a successful keygen.
pub const SELF_TEST_MESSAGE: &[u8] = b"hello meta";
pub const SELF_TEST_HEIGHT: u64 = 10;
pub const SELF_TEST_NONCE: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeremonyState {
    NotStarted,
    /// Waiting for the ledger to reach (or re-open) the target height.
    Waiting { target: i64 },
    Performing { target: i64 },
    VotedSuccess,
    VotedFailed,
    Done,
}

/// Key generation driven by ledger keygen tasks.
pub struct KeygenCeremony {
    /// Multi-party key generator
    generator: Arc<dyn KeyGenerator>,
    /// Signer used for the post-keygen self-test
    signer: Arc<dyn KeySigner>,
    /// Source of keygen tasks and target of votes
    ledger: Arc<dyn LedgerClient>,
    /// Signing settings for the self-test round
    signing: SigningConfig,
    /// Tick interval, keygen timeout and algorithm
    config: KeygenConfig,
    state: CeremonyState,
    /// Ledger height seen on the previous tick (0 before the first)
    last_seen_height: i64,
    iterations: u32,
}

impl KeygenCeremony {
    /// Create a new keygen ceremony in `NotStarted`
    ///
    /// # Arguments
    /// * `generator` - Multi-party key generator
    /// * `signer` - Signer for the self-test with the new key
    /// * `ledger` - Ledger client for tasks, votes and blame
    /// * `signing` - Signing settings used by the self-test
    /// * `config` - Keygen settings
    pub fn new(
        generator: Arc<dyn KeyGenerator>,
        signer: Arc<dyn KeySigner>,
        ledger: Arc<dyn LedgerClient>,
        signing: SigningConfig,
        config: KeygenConfig,
    ) -> Self {
        Self {
            generator,
            signer,
            ledger,
            signing,
            config,
            state: CeremonyState::NotStarted,
            last_seen_height: 0,
            iterations: 0,
        }
    }

    pub fn state(&self) -> CeremonyState {
        self.state
    }

    /// Ticks run so far, including throttled ones.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Run the ceremony on its ticker and return the TSS now current on the
    /// ledger.
    pub async fn run(mut self, ctx: &CancellationToken) -> Result<TssRecord, KeygenError> {
        let ticker = Ticker::new("tss_keygen", self.config.tick_interval())
            .map_err(|e| KeygenError::Failed(e.to_string()))?;

        ticker.run(ctx, &mut self).await.map_err(|e| match e {
            TickerError::Cancelled { .. } => KeygenError::Cancelled,
            TickerError::Task { source, .. } => match source.downcast::<KeygenError>() {
                Ok(err) => *err,
                Err(other) => KeygenError::Failed(other.to_string()),
            },
            other => KeygenError::Failed(other.to_string()),
        })?;

        // Give the ledger one block to finalize our vote.
        if self.iterations > 1 {
            self.wait_for_next_block(ctx, ticker.interval()).await?;
        }

        Ok(self.ledger.get_tss().await?)
    }

    fn transition(&mut self, next: CeremonyState) {
        if self.state != next {
            info!("Keygen ceremony: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    async fn wait_for_next_block(
        &self,
        ctx: &CancellationToken,
        period: Duration,
    ) -> Result<(), KeygenError> {
        let start = self.ledger.get_block_height().await?;
        let mut interval = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => return Err(KeygenError::Cancelled),
                _ = interval.tick() => {}
            }

            match self.ledger.get_block_height().await {
                Ok(height) if height > start => return Ok(()),
                Ok(_) => {}
                Err(e) => debug!(error = %e, "waiting for next block"),
            }
        }
    }

    async fn on_pending(
        &mut self,
        ctx: &CancellationToken,
        task: KeygenTask,
    ) -> Result<Tick, TaskError<KeygenError>> {
        let height = self
            .ledger
            .get_block_height()
            .await
            .map_err(|e| TaskError::Transient(e.into()))?;

        // one iteration per block
        if height != 0 && height == self.last_seen_height {
            return Ok(Tick::Continue);
        }
        self.last_seen_height = height;

        let target = task.block_number;
        if height != target {
            if height < target {
                info!(
                    height,
                    target,
                    blocks_left = target - height,
                    "Waiting for keygen block"
                );
            } else {
                info!(height, target, "Keygen block passed, waiting for a new keygen task");
            }
            self.transition(CeremonyState::Waiting { target });
            return Ok(Tick::Continue);
        }

        self.transition(CeremonyState::Performing { target });
        LogEvent::new(EventType::KeygenStarted)
            .with_context(fields::HEIGHT, target)
            .with_context("participants", task.granted_pubkeys.len())
            .emit();

        let started = Instant::now();
        match self.perform_keygen(ctx, &task).await {
            Ok(pubkey) => {
                let tx_hash = self
                    .ledger
                    .post_vote_tss(pubkey.bech32(), target, ReceiveStatus::Success)
                    .await
                    .map_err(|e| TaskError::Fatal(KeygenError::VoteFailed(e)))?;

                LogEvent::new(EventType::KeygenVotedSuccess)
                    .with_correlation_id(pubkey.bech32())
                    .with_context(fields::HEIGHT, target)
                    .with_context(fields::TX_HASH, tx_hash)
                    .with_duration(started.elapsed())
                    .emit();
                self.transition(CeremonyState::VotedSuccess);

                self.self_test(ctx, pubkey).await;

                self.transition(CeremonyState::Done);
                Ok(Tick::Stop)
            }
            Err(KeygenError::Cancelled) => Err(TaskError::Fatal(KeygenError::Cancelled)),
            Err(err) => {
                let tx_hash = self
                    .ledger
                    .post_vote_tss("", target, ReceiveStatus::Failed)
                    .await
                    .map_err(|e| TaskError::Fatal(KeygenError::VoteFailed(e)))?;

                LogEvent::new(EventType::KeygenVotedFailed)
                    .with_context(fields::HEIGHT, target)
                    .with_context(fields::TX_HASH, tx_hash)
                    .with_duration(started.elapsed())
                    .with_error(&err)
                    .emit();
                self.transition(CeremonyState::VotedFailed);
                self.transition(CeremonyState::Waiting { target });
                Ok(Tick::Continue)
            }
        }
    }

    /// Run the generator once. Failures are blamed on the ledger before
    /// returning.
    async fn perform_keygen(
        &self,
        ctx: &CancellationToken,
        task: &KeygenTask,
    ) -> Result<PubKey, KeygenError> {
        let request = KeygenRequest {
            keys: task.granted_pubkeys.clone(),
            block_height: task.block_number,
            version: self.signing.protocol_version.clone(),
            algo: self.config.algo.clone(),
        };

        let timeout = self.config.keygen_timeout();
        let outcome = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(KeygenError::Cancelled),
            outcome = tokio::time::timeout(timeout, self.generator.keygen(request.clone())) => outcome,
        };

        let (reason, blame_nodes) = match outcome {
            Ok(Ok(response)) if response.status == Status::Success && !response.pub_key.is_empty() => {
                let pubkey = PubKey::from_bech32(&response.pub_key).map_err(|e| {
                    metrics::record_keygen_attempt(false);
                    KeygenError::InvalidKey(e)
                })?;
                metrics::record_keygen_attempt(true);
                info!(pubkey = %pubkey.bech32(), height = task.block_number, "Keygen succeeded");
                return Ok(pubkey);
            }
            Ok(Ok(response)) => (response.blame.fail_reason, response.blame.blame_nodes),
            Ok(Err(e)) => (e.to_string(), Vec::new()),
            Err(_) => (KeygenError::Timeout(timeout).to_string(), Vec::new()),
        };

        metrics::record_keygen_attempt(false);
        metrics::record_blame(blame_nodes.iter().map(|n| n.pubkey.as_str()));
        warn!(
            height = task.block_number,
            reason = %reason,
            blamed = blame_nodes.len(),
            "Keygen failed"
        );

        let index =
            keygen_blame_index(&request, task.block_number).map_err(blame_index_failure)?;
        let record = BlameRecord {
            index: index.clone(),
            fail_reason: reason.clone(),
            nodes: blame_nodes,
        };
        let chain_id = self.ledger.chain_id();

        match self.ledger.post_vote_blame_data(&record, chain_id, &index).await {
            Ok(tx_hash) => {
                LogEvent::new(EventType::BlamePosted)
                    .with_correlation_id(&index)
                    .with_context(fields::CHAIN_ID, chain_id)
                    .with_context(fields::TX_HASH, tx_hash)
                    .emit();
            }
            Err(e) => {
                LogEvent::new(EventType::BlamePostFailed)
                    .with_context(fields::BLAME_INDEX, &index)
                    .with_context(fields::CHAIN_ID, chain_id)
                    .with_error(&e)
                    .emit();
            }
        }

        Err(KeygenError::Failed(reason))
    }

    /// Sign a fixed payload with the new key. The outcome is only logged.
    async fn self_test(&self, ctx: &CancellationToken, pubkey: PubKey) {
        let mut signing = self.signing.clone();
        signing.post_blame = false;

        let service = SigningService::new(self.signer.clone(), self.ledger.clone(), pubkey, &signing);
        let digest = keccak256(SELF_TEST_MESSAGE);
        let chain_id = self.ledger.chain_id();

        match service
            .sign(ctx, digest, SELF_TEST_HEIGHT, SELF_TEST_NONCE, chain_id)
            .await
        {
            Ok(_) => info!("Keygen self-test signature verified"),
            Err(e) => {
                LogEvent::new(EventType::KeygenSelfTestFailed)
                    .with_context(fields::CHAIN_ID, chain_id)
                    .with_error(&e)
                    .emit();
            }
        }
    }
}

#[async_trait]
impl ScheduledTask for KeygenCeremony {
    type Error = KeygenError;

    async fn tick(&mut self, ctx: &CancellationToken) -> Result<Tick, TaskError<KeygenError>> {
        if self.state == CeremonyState::Done {
            return Ok(Tick::Stop);
        }
        self.iterations += 1;

        let task = self
            .ledger
            .get_keygen()
            .await
            .map_err(|e| TaskError::Transient(e.into()))?;

        match task.status {
            KeygenStatus::Success => {
                self.transition(CeremonyState::Done);
                Ok(Tick::Stop)
            }
            KeygenStatus::Failed => {
                self.transition(CeremonyState::Waiting {
                    target: task.block_number,
                });
                Ok(Tick::Continue)
            }
            KeygenStatus::Pending => self.on_pending(ctx, task).await,
            KeygenStatus::Unknown => Err(TaskError::Fatal(KeygenError::UnexpectedStatus(
                task.status.to_string(),
            ))),
        }
    }
}

/// A blame index that cannot be derived fails the attempt; the key itself is
/// not at fault.
fn blame_index_failure(err: CryptoError) -> KeygenError {
    KeygenError::Failed(format!("deriving keygen blame index: {}", err))
}
