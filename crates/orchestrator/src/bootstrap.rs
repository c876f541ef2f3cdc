//! Node bootstrap: bring the TSS key online and hand back a ready signer.

use anyhow::Context;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use common::NodeConfig;
use threshold_crypto::PubKey;
use threshold_types::{
    ChainId, KeyGenerator, KeySigner, LedgerClient, PeerId, PeerNetwork, TssRecord,
};

use crate::error::{OrchestrationError, Result};
use crate::health_monitor::PeerHealthMonitor;
use crate::keygen_ceremony::KeygenCeremony;
use crate::keystore::Keystore;
use crate::signing_service::SigningService;

/// External collaborators the node is wired to.
pub struct Collaborators {
    pub key_signer: Arc<dyn KeySigner>,
    pub generator: Arc<dyn KeyGenerator>,
    pub ledger: Arc<dyn LedgerClient>,
    pub network: Arc<dyn PeerNetwork>,
    pub keystore: Arc<dyn Keystore>,
    /// This node's bech32 operator pubkey as listed in TSS participant sets.
    pub grantee_pubkey: String,
}

/// A node with its TSS key loaded.
pub struct Node {
    pub tss: TssRecord,
    pub signer: Arc<SigningService>,
    pub health: Arc<PeerHealthMonitor>,
    /// Stops the health tickers. A child of the context passed to [`bootstrap`].
    pub health_ctx: CancellationToken,
    pub tasks: Vec<JoinHandle<()>>,
}

/// Every historical TSS this node took part in must have a local key share.
pub fn verify_key_shares(
    history: &[TssRecord],
    keystore: &dyn Keystore,
    grantee_pubkey: &str,
) -> Result<()> {
    let shares = keystore.pubkeys()?;

    for record in history.iter().filter(|r| r.has_participant(grantee_pubkey)) {
        if !shares.contains(&record.tss_pubkey) {
            return Err(OrchestrationError::MissingKeyShare {
                pubkey: record.tss_pubkey.clone(),
            });
        }
    }

    Ok(())
}

/// The TSS key must map to a usable EVM and Bitcoin address.
pub fn validate_addresses(pubkey: &PubKey, btc_chain: ChainId) -> Result<()> {
    let evm = pubkey.evm_address();
    if evm.trim_start_matches("0x").chars().all(|c| c == '0') {
        return Err(OrchestrationError::InvalidAddress(format!(
            "zero EVM address for {}",
            pubkey
        )));
    }

    let btc = pubkey
        .btc_address(btc_chain)
        .map_err(|e| OrchestrationError::InvalidAddress(format!("BTC address: {}", e)))?;

    info!(evm = %evm, btc = %btc, "TSS addresses");
    Ok(())
}

/// Start the health monitor, complete keygen and load the current TSS.
///
/// Steps run in order: resolve the peer whitelist, start the health
/// monitor, run the keygen ceremony, then check key shares and addresses
/// against the TSS history. Any failure after the monitor is up cancels its
/// tickers before returning.
pub async fn bootstrap(
    config: &NodeConfig,
    deps: Collaborators,
    ctx: &CancellationToken,
) -> anyhow::Result<Node> {
    let keygen = deps
        .ledger
        .get_keygen()
        .await
        .context("fetching keygen task")?;

    let whitelist = keygen
        .granted_pubkeys
        .iter()
        .map(|pubkey| {
            deps.network
                .peer_id_for_pubkey(pubkey)
                .with_context(|| format!("resolving peer ID of grantee {}", pubkey))
        })
        .collect::<anyhow::Result<Vec<PeerId>>>()?;

    let health = Arc::new(PeerHealthMonitor::new(
        deps.network.clone(),
        whitelist,
        config.health.clone(),
    ));
    let health_ctx = ctx.child_token();
    let tasks = health
        .clone()
        .spawn(&health_ctx)
        .context("starting peer health monitor")?;

    match load_tss(config, deps, ctx).await {
        Ok((tss, signer)) => Ok(Node {
            tss,
            signer,
            health,
            health_ctx,
            tasks,
        }),
        Err(e) => {
            health_ctx.cancel();
            Err(e)
        }
    }
}

async fn load_tss(
    config: &NodeConfig,
    deps: Collaborators,
    ctx: &CancellationToken,
) -> anyhow::Result<(TssRecord, Arc<SigningService>)> {
    let ceremony = KeygenCeremony::new(
        deps.generator.clone(),
        deps.key_signer.clone(),
        deps.ledger.clone(),
        config.signing.clone(),
        config.keygen.clone(),
    );
    let tss = ceremony.run(ctx).await.context("running keygen ceremony")?;

    let history = deps
        .ledger
        .get_tss_history()
        .await
        .context("fetching TSS history")?;
    verify_key_shares(&history, deps.keystore.as_ref(), &deps.grantee_pubkey)
        .context("verifying key shares")?;

    let pubkey = PubKey::from_bech32(&tss.tss_pubkey).context("parsing current TSS pubkey")?;
    validate_addresses(&pubkey, ChainId(config.bitcoin.chain_id))?;

    let signer = Arc::new(SigningService::new(
        deps.key_signer,
        deps.ledger,
        pubkey,
        &config.signing,
    ));

    info!(
        tss = %tss.tss_pubkey,
        finalized_height = tss.finalized_zeta_height,
        "TSS ready"
    );

    Ok((tss, signer))
}
