//! Collaborator traits. Implementations live outside this workspace; tests
//! provide hand-written mocks.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::chain::ChainId;
use crate::error::{KeySignerError, LedgerError, PeerError, SigningError};
use crate::ledger::{BlameRecord, KeygenTask, ReceiveStatus, TssRecord};
use crate::tss::{
    Digest, KeygenRequest, KeygenResponse, KeysignRequest, KeysignResponse, PeerId, Signature65,
};
use std::time::Duration;

/// The multi-party keysign capability. Blocks for the whole network protocol.
#[async_trait]
pub trait KeySigner: Send + Sync {
    async fn key_sign(&self, request: KeysignRequest) -> Result<KeysignResponse, KeySignerError>;
}

/// The multi-party keygen capability.
#[async_trait]
pub trait KeyGenerator: Send + Sync {
    async fn keygen(&self, request: KeygenRequest) -> Result<KeygenResponse, KeySignerError>;
}

/// Client of the external ledger that finalizes votes.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Chain id of the ledger itself.
    fn chain_id(&self) -> ChainId;

    async fn get_keygen(&self) -> Result<KeygenTask, LedgerError>;

    async fn get_tss(&self) -> Result<TssRecord, LedgerError>;

    async fn get_tss_history(&self) -> Result<Vec<TssRecord>, LedgerError>;

    async fn get_block_height(&self) -> Result<i64, LedgerError>;

    /// Vote on a keygen outcome. An empty pubkey accompanies a failure vote.
    async fn post_vote_tss(
        &self,
        tss_pubkey: &str,
        keygen_height: i64,
        status: ReceiveStatus,
    ) -> Result<String, LedgerError>;

    async fn post_vote_blame_data(
        &self,
        blame: &BlameRecord,
        chain_id: ChainId,
        index: &str,
    ) -> Result<String, LedgerError>;

    async fn add_outbound_tracker(
        &self,
        chain_id: ChainId,
        nonce: u64,
        tx_hash: &str,
    ) -> Result<String, LedgerError>;
}

/// Signing as seen by chain-specific transaction builders.
#[async_trait]
pub trait TssSigner: Send + Sync {
    async fn sign(
        &self,
        ctx: &CancellationToken,
        digest: Digest,
        height: u64,
        nonce: u64,
        chain_id: ChainId,
    ) -> Result<Signature65, SigningError>;

    async fn sign_batch(
        &self,
        ctx: &CancellationToken,
        digests: &[Digest],
        height: u64,
        nonce: u64,
        chain_id: ChainId,
    ) -> Result<Vec<Signature65>, SigningError>;
}

/// The peer-to-peer transport the signer runs over.
#[async_trait]
pub trait PeerNetwork: Send + Sync {
    fn local_peer(&self) -> PeerId;

    /// Transport peer ID of a bech32 operator pubkey.
    fn peer_id_for_pubkey(&self, bech32_pubkey: &str) -> Result<PeerId, PeerError>;

    /// Round-trip time of a single ping.
    async fn ping(&self, peer: &PeerId) -> Result<Duration, PeerError>;

    fn connected_peer_count(&self) -> usize;
}
