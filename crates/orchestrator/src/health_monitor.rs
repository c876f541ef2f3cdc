//! Peer Health Monitor
//!
//! Two independent tickers watch the transport:
//! - ping every whitelisted peer except ourselves and keep a snapshot of the
//!   round-trip times (`-1` for a peer that failed or timed out);
//! - export the number of connected peers as a gauge.
//!
//! Each ping runs in its own task, so a peer that hangs or panics only costs
//! its own entry in the snapshot.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use common::observability::{fields, EventType, LogEvent};
use common::{HealthConfig, ScheduledTask, TaskError, Tick, Ticker, TickerError};
use threshold_types::{PeerError, PeerId, PeerNetwork};

use crate::metrics;

/// Round-trip value recorded for an unreachable peer.
pub const UNREACHABLE_RTT: i64 = -1;

pub struct PeerHealthMonitor {
    network: Arc<dyn PeerNetwork>,
    whitelist: Vec<PeerId>,
    config: HealthConfig,
    snapshot: RwLock<HashMap<PeerId, i64>>,
}

impl PeerHealthMonitor {
    pub fn new(network: Arc<dyn PeerNetwork>, whitelist: Vec<PeerId>, config: HealthConfig) -> Self {
        Self {
            network,
            whitelist,
            config,
            snapshot: RwLock::new(HashMap::new()),
        }
    }

    /// Last known round-trip times in milliseconds.
    pub async fn snapshot(&self) -> HashMap<PeerId, i64> {
        self.snapshot.read().await.clone()
    }

    /// Ping every whitelisted peer once and replace the snapshot.
    pub async fn ping_peers_once(&self) -> HashMap<PeerId, i64> {
        let local = self.network.local_peer();
        let timeout = self.config.ping_timeout();

        let peers: Vec<PeerId> = self
            .whitelist
            .iter()
            .filter(|p| **p != local)
            .cloned()
            .collect();

        let handles: Vec<_> = peers
            .iter()
            .map(|peer| {
                let network = self.network.clone();
                let peer = peer.clone();
                tokio::spawn(async move {
                    match tokio::time::timeout(timeout, network.ping(&peer)).await {
                        Ok(Ok(rtt)) => Ok(rtt.as_millis() as i64),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(_) => Err(format!("ping timed out after {:?}", timeout)),
                    }
                })
            })
            .collect();

        let mut results = HashMap::with_capacity(peers.len());
        for (peer, joined) in peers.into_iter().zip(join_all(handles).await) {
            let rtt = match joined {
                Ok(Ok(rtt)) => rtt,
                Ok(Err(reason)) => {
                    LogEvent::new(EventType::PeerUnreachable)
                        .with_context(fields::PEER, &peer)
                        .with_error(reason)
                        .emit();
                    UNREACHABLE_RTT
                }
                Err(e) => {
                    error!(peer = %peer, error = %e, "Ping task aborted");
                    UNREACHABLE_RTT
                }
            };
            metrics::set_peer_rtt(&peer.0, rtt);
            results.insert(peer, rtt);
        }

        *self.snapshot.write().await = results.clone();
        debug!(peers = results.len(), "Peer ping round completed");
        results
    }

    /// Read the connected peer count from the transport and export it.
    pub fn count_connected_once(&self) -> usize {
        let count = self.network.connected_peer_count();
        metrics::CONNECTED_PEERS.set(count as i64);
        count
    }

    /// Start both tickers. They stop when `ctx` is cancelled.
    pub fn spawn(
        self: Arc<Self>,
        ctx: &CancellationToken,
    ) -> Result<Vec<JoinHandle<()>>, TickerError> {
        let ping_ticker = Ticker::new("ping_peers", self.config.ping_interval())?;
        let count_ticker = Ticker::new("count_peers", self.config.peer_count_interval())?;

        info!(
            peers = self.whitelist.len(),
            interval = ?self.config.ping_interval(),
            "Starting peer health monitor"
        );

        let ping = {
            let mut task = PingPeers(self.clone());
            let ctx = ctx.clone();
            tokio::spawn(async move {
                log_exit(ping_ticker.run(&ctx, &mut task).await);
            })
        };

        let count = {
            let mut task = CountPeers(self);
            let ctx = ctx.clone();
            tokio::spawn(async move {
                log_exit(count_ticker.run(&ctx, &mut task).await);
            })
        };

        Ok(vec![ping, count])
    }
}

fn log_exit(result: Result<(), TickerError>) {
    match result {
        Ok(()) | Err(TickerError::Cancelled { .. }) => debug!("Peer health ticker stopped"),
        Err(e) => warn!(error = %e, "Peer health ticker exited"),
    }
}

struct PingPeers(Arc<PeerHealthMonitor>);

#[async_trait]
impl ScheduledTask for PingPeers {
    type Error = PeerError;

    async fn tick(&mut self, _ctx: &CancellationToken) -> Result<Tick, TaskError<PeerError>> {
        self.0.ping_peers_once().await;
        Ok(Tick::Continue)
    }
}

struct CountPeers(Arc<PeerHealthMonitor>);

#[async_trait]
impl ScheduledTask for CountPeers {
    type Error = PeerError;

    async fn tick(&mut self, _ctx: &CancellationToken) -> Result<Tick, TaskError<PeerError>> {
        let count = self.0.count_connected_once();
        debug!(count, "Connected peers");
        Ok(Tick::Continue)
    }
}
