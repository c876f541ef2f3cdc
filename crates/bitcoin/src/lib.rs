//! Bitcoin outbounds signed by the TSS key.
//!
//! Withdrawals spend P2WPKH outputs of the TSS address. Each outbound
//! carries a nonce-mark output that the next outbound must spend, which
//! chains outbounds in nonce order on chain. Stuck outbounds are replaced
//! through [`CpfpFeeBumper`] once the ledger raises the fee rate.

pub mod cpfp;
pub mod error;
pub mod fee;
pub mod mempool;
pub mod outbound;
pub mod rpc;
pub mod signer;
pub mod utxo;

pub use cpfp::{bump_rate, CpfpFeeBumper, CpfpPlan, FeeBump};
pub use error::{BitcoinError, Result};
pub use mempool::{is_tx_stuck_in_mempool, mempool_parents_fees, MempoolParents, PendingStatus};
pub use outbound::{network_for, OutboundData, OutboundParams};
pub use rpc::{BitcoinRpc, MempoolEntry};
pub use signer::{BitcoinOutboundSigner, OutboundOutcome, StuckOutbound, StuckOutboundWatcher};
pub use utxo::{select_utxos, Selection, Utxo};
