//! Signing Service
//!
//! Runs digests through the multi-party signer with the current TSS key.
//!
//! # Round
//!
//! 1. Reject empty batches.
//! 2. Serve from the cache when `(chain, nonce, digests)` was already signed.
//! 3. Take a ceremony slot from the [`RateLimiter`] (may wait).
//! 4. Invoke the [`KeySigner`] with the base64 digests.
//! 5. On ceremony failure count blame per node, optionally post a
//!    [`BlameRecord`] and return [`SigningError::KeysignFailed`].
//! 6. Match each returned signature to its digest and verify it against the
//!    TSS key. One bad signature fails the batch.
//! 7. Cache the verified batch.
//!
//! Latency is recorded for every round that reached the signer.

use async_trait::async_trait;
use base64::prelude::*;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use common::observability::{fields, EventType, LogEvent};
use common::SigningConfig;
use threshold_crypto::{blame_index, combine_digests, verify_signature, PubKey};
use threshold_types::{
    BlameRecord, ChainId, Digest, KeySigner, KeysignRequest, KeysignResponse, LedgerClient,
    Signature65, SigningError, Status, TssSigner, WireSignature,
};

use crate::metrics;
use crate::rate_limit::RateLimiter;
use crate::signing_cache::SigningCache;

/// Signs digests with the current TSS key.
pub struct SigningService {
    /// Multi-party signer running the ceremonies
    key_signer: Arc<dyn KeySigner>,
    /// Ledger that receives blame records
    ledger: Arc<dyn LedgerClient>,
    /// TSS key every returned signature must verify against
    pubkey: PubKey,
    /// Verified batches keyed by chain, nonce and digests
    cache: SigningCache,
    /// Caps ceremonies in flight (`max_pending_signatures`)
    limiter: RateLimiter,
    /// Post blame to the ledger when a ceremony fails
    post_blame: bool,
    /// Protocol version sent with each request
    protocol_version: String,
    /// Upper bound on a single ceremony
    keysign_timeout: Duration,
    /// Ceremonies currently inside the signer
    active: AtomicI64,
}

/// Keeps the active-ceremony gauge in step with the rounds in flight.
struct ActiveRound<'a> {
    active: &'a AtomicI64,
}

impl<'a> ActiveRound<'a> {
    fn start(active: &'a AtomicI64) -> Self {
        active.fetch_add(1, Ordering::AcqRel);
        metrics::ACTIVE_SIGNS.inc();
        Self { active }
    }
}

impl Drop for ActiveRound<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
        metrics::ACTIVE_SIGNS.dec();
    }
}

impl SigningService {
    /// Create a new signing service
    ///
    /// # Arguments
    /// * `key_signer` - Multi-party signer
    /// * `ledger` - Ledger client used for blame submission
    /// * `pubkey` - Current TSS public key
    /// * `config` - Cache size, concurrency cap, timeout and blame policy
    pub fn new(
        key_signer: Arc<dyn KeySigner>,
        ledger: Arc<dyn LedgerClient>,
        pubkey: PubKey,
        config: &SigningConfig,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.cache_capacity).unwrap_or(NonZeroUsize::MIN);

        Self {
            key_signer,
            ledger,
            pubkey,
            cache: SigningCache::new(capacity),
            limiter: RateLimiter::new(config.max_pending_signatures),
            post_blame: config.post_blame,
            protocol_version: config.protocol_version.clone(),
            keysign_timeout: config.keysign_timeout(),
            active: AtomicI64::new(0),
        }
    }

    pub fn pubkey(&self) -> &PubKey {
        &self.pubkey
    }

    /// Ceremonies holding a slot right now.
    pub fn pending(&self) -> u64 {
        self.limiter.pending()
    }

    /// Ceremonies currently inside the signer.
    pub fn active(&self) -> i64 {
        self.active.load(Ordering::Acquire)
    }

    pub async fn sign(
        &self,
        ctx: &CancellationToken,
        digest: Digest,
        height: u64,
        nonce: u64,
        chain_id: ChainId,
    ) -> Result<Signature65, SigningError> {
        let mut signatures = self.sign_batch(ctx, &[digest], height, nonce, chain_id).await?;
        signatures
            .pop()
            .ok_or_else(|| SigningError::Protocol("empty signature batch".to_string()))
    }

    pub async fn sign_batch(
        &self,
        ctx: &CancellationToken,
        digests: &[Digest],
        height: u64,
        nonce: u64,
        chain_id: ChainId,
    ) -> Result<Vec<Signature65>, SigningError> {
        if digests.is_empty() {
            return Err(SigningError::InvalidRequest("empty digest batch".to_string()));
        }

        if let Some(signatures) = self.cached(chain_id, nonce, digests) {
            return Ok(signatures);
        }

        let _slot = self.limiter.acquire(ctx).await?;

        // An identical request may have finished while we waited.
        if let Some(signatures) = self.cached(chain_id, nonce, digests) {
            return Ok(signatures);
        }

        let started = Instant::now();
        let result = {
            let _round = ActiveRound::start(&self.active);
            self.run_round(ctx, digests, height, nonce, chain_id).await
        };
        metrics::record_sign_latency(started.elapsed(), result.is_ok());

        if let Ok(signatures) = &result {
            self.cache.put(chain_id, nonce, digests, signatures.clone());
        }
        round_event(&result, chain_id, nonce, height)
            .with_duration(started.elapsed())
            .emit();

        result
    }

    fn cached(&self, chain_id: ChainId, nonce: u64, digests: &[Digest]) -> Option<Vec<Signature65>> {
        let signatures = self.cache.get(chain_id, nonce, digests)?;
        metrics::SIGN_CACHE_HITS.inc();
        debug!(chain_id = %chain_id, nonce, "keysign served from cache");
        Some(signatures)
    }

    async fn run_round(
        &self,
        ctx: &CancellationToken,
        digests: &[Digest],
        height: u64,
        nonce: u64,
        chain_id: ChainId,
    ) -> Result<Vec<Signature65>, SigningError> {
        let messages: Vec<String> = digests.iter().map(|d| BASE64_STANDARD.encode(d)).collect();
        let request = KeysignRequest {
            pool_pub_key: self.pubkey.bech32().to_string(),
            messages: messages.clone(),
            block_height: height as i64,
            signer_pub_keys: Vec::new(),
            version: self.protocol_version.clone(),
        };

        LogEvent::new(EventType::KeysignStarted)
            .with_context(fields::CHAIN_ID, chain_id)
            .with_context(fields::NONCE, nonce)
            .with_context(fields::HEIGHT, height)
            .with_context("digests", digests.len())
            .emit();

        let response = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(SigningError::Cancelled),
            response = tokio::time::timeout(self.keysign_timeout, self.key_signer.key_sign(request)) => response,
        };

        let response = match response {
            Err(_) => {
                return Err(SigningError::KeysignFailed {
                    reason: "keysign timed out".to_string(),
                    blamed: Vec::new(),
                })
            }
            Ok(Err(e)) => return Err(SigningError::Signer(e.to_string())),
            Ok(Ok(response)) => response,
        };

        if response.status != Status::Success {
            return Err(self
                .handle_failure(ctx, &response, digests, height, nonce, chain_id)
                .await);
        }

        if response.signatures.len() != digests.len() {
            error!(
                chain_id = %chain_id,
                nonce,
                signatures = response.signatures.len(),
                digests = digests.len(),
                "signature count does not match digest count"
            );
            return Err(SigningError::Protocol(format!(
                "got {} signatures for {} digests",
                response.signatures.len(),
                digests.len()
            )));
        }

        let mut signatures = Vec::with_capacity(digests.len());
        for (index, (digest, msg)) in digests.iter().zip(&messages).enumerate() {
            let wire = response
                .signatures
                .iter()
                .find(|s| &s.msg == msg)
                .ok_or_else(|| {
                    SigningError::Protocol(format!("no signature returned for digest {}", index))
                })?;

            let signature = decode_signature(wire)
                .map_err(|reason| SigningError::VerificationFailed { index, reason })?;

            if let Err(e) = verify_signature(digest, &signature, &self.pubkey) {
                LogEvent::new(EventType::SignatureRejected)
                    .with_context(fields::CHAIN_ID, chain_id)
                    .with_context(fields::NONCE, nonce)
                    .with_context("digest_index", index)
                    .with_error(&e)
                    .emit();
                return Err(SigningError::VerificationFailed {
                    index,
                    reason: e.to_string(),
                });
            }

            signatures.push(signature);
        }

        Ok(signatures)
    }

    async fn handle_failure(
        &self,
        ctx: &CancellationToken,
        response: &KeysignResponse,
        digests: &[Digest],
        height: u64,
        nonce: u64,
        chain_id: ChainId,
    ) -> SigningError {
        let blame = &response.blame;
        let blamed: Vec<String> = blame.blame_nodes.iter().map(|n| n.pubkey.clone()).collect();
        metrics::record_blame(blamed.iter().map(String::as_str));

        warn!(
            chain_id = %chain_id,
            nonce,
            reason = %blame.fail_reason,
            blamed = ?blamed,
            "keysign ceremony failed"
        );

        if self.post_blame && !ctx.is_cancelled() {
            let index = blame_index(chain_id, nonce, &combine_digests(digests), height);
            let record = BlameRecord {
                index: index.clone(),
                fail_reason: blame.fail_reason.clone(),
                nodes: blame.blame_nodes.clone(),
            };

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
        }

        SigningError::KeysignFailed {
            reason: blame.fail_reason.clone(),
            blamed,
        }
    }
}

#[async_trait]
impl TssSigner for SigningService {
    async fn sign(
        &self,
        ctx: &CancellationToken,
        digest: Digest,
        height: u64,
        nonce: u64,
        chain_id: ChainId,
    ) -> Result<Signature65, SigningError> {
        SigningService::sign(self, ctx, digest, height, nonce, chain_id).await
    }

    async fn sign_batch(
        &self,
        ctx: &CancellationToken,
        digests: &[Digest],
        height: u64,
        nonce: u64,
        chain_id: ChainId,
    ) -> Result<Vec<Signature65>, SigningError> {
        SigningService::sign_batch(self, ctx, digests, height, nonce, chain_id).await
    }
}

/// Outcome event of a round that reached the signer.
fn round_event(
    result: &Result<Vec<Signature65>, SigningError>,
    chain_id: ChainId,
    nonce: u64,
    height: u64,
) -> LogEvent {
    let event = match result {
        Ok(signatures) => {
            LogEvent::new(EventType::KeysignCompleted).with_context("signatures", signatures.len())
        }
        Err(e) => LogEvent::new(EventType::KeysignFailed).with_error(e),
    };
    event
        .with_context(fields::CHAIN_ID, chain_id)
        .with_context(fields::NONCE, nonce)
        .with_context(fields::HEIGHT, height)
}

/// Decode the base64 `R`, `S` and recovery id of a returned signature.
fn decode_signature(wire: &WireSignature) -> Result<Signature65, String> {
    let r = decode_fixed::<32>("R", &wire.r)?;
    let s = decode_fixed::<32>("S", &wire.s)?;
    let v = decode_fixed::<1>("recovery id", &wire.recovery_id)?;
    Ok(Signature65::from_parts(&r, &s, v[0]))
}

fn decode_fixed<const N: usize>(label: &str, value: &str) -> Result<[u8; N], String> {
    let bytes = BASE64_STANDARD
        .decode(value)
        .map_err(|e| format!("decoding {}: {}", label, e))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("{} has {} bytes, expected {}", label, b.len(), N))
}
