//! TSS Coordination Service
//!
//! Sits between chain-specific signers and the multi-party signer:
//!
//! - [`SigningService`] rate-limits, caches and verifies keysign rounds
//! - [`KeygenCeremony`] drives key generation to completion exactly once
//! - [`PeerHealthMonitor`] pings peers and tracks transport connectivity
//! - [`bootstrap`](bootstrap::bootstrap) wires them together at start-up

pub mod bootstrap;
pub mod error;
pub mod health_monitor;
pub mod keygen_ceremony;
pub mod keystore;
pub mod metrics;
pub mod rate_limit;
pub mod signing_cache;
pub mod signing_service;

pub use bootstrap::{bootstrap, validate_addresses, verify_key_shares, Collaborators, Node};
pub use error::{KeygenError, OrchestrationError, RateLimitError, Result};
pub use health_monitor::{PeerHealthMonitor, UNREACHABLE_RTT};
pub use keygen_ceremony::{CeremonyState, KeygenCeremony};
pub use keystore::{FileKeystore, Keystore};
pub use rate_limit::{RateLimiter, SlotGuard};
pub use signing_cache::SigningCache;
pub use signing_service::SigningService;
