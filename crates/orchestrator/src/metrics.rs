//! Prometheus Metrics for the TSS coordination layer
//!
//! Collectors are registered once in the default registry. Exporting them is
//! left to the embedding process.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};
use std::time::Duration;

lazy_static! {
    /// Keysign ceremonies currently in flight
    pub static ref ACTIVE_SIGNS: IntGauge = register_int_gauge!(
        "threshold_tss_active_signs",
        "Number of keysign ceremonies in flight"
    )
    .expect("Failed to register threshold_tss_active_signs metric");

    /// Keysign round latency (seconds), by outcome
    pub static ref SIGN_LATENCY: HistogramVec = register_histogram_vec!(
        "threshold_tss_sign_latency_seconds",
        "Keysign round latency in seconds",
        &["result"],
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0]
    )
    .expect("Failed to register threshold_tss_sign_latency_seconds metric");

    /// Requests answered from the signing cache
    pub static ref SIGN_CACHE_HITS: IntCounter = register_int_counter!(
        "threshold_tss_sign_cache_hits_total",
        "Signing requests served from the cache"
    )
    .expect("Failed to register threshold_tss_sign_cache_hits_total metric");

    /// Blame count per accused node
    pub static ref NODE_BLAME: IntCounterVec = register_int_counter_vec!(
        "threshold_tss_node_blame_total",
        "Number of times a node was blamed for a failed ceremony",
        &["pubkey"]
    )
    .expect("Failed to register threshold_tss_node_blame_total metric");

    /// Keygen attempts by outcome
    pub static ref KEYGEN_ATTEMPTS: IntCounterVec = register_int_counter_vec!(
        "threshold_tss_keygen_attempts_total",
        "Keygen ceremony attempts by outcome",
        &["result"]
    )
    .expect("Failed to register threshold_tss_keygen_attempts_total metric");

    /// Peers connected at the transport layer
    pub static ref CONNECTED_PEERS: IntGauge = register_int_gauge!(
        "threshold_p2p_connected_peers",
        "Number of peers connected at the transport layer"
    )
    .expect("Failed to register threshold_p2p_connected_peers metric");

    /// Last ping round-trip per peer in milliseconds, -1 when unreachable
    pub static ref PEER_RTT_MS: IntGaugeVec = register_int_gauge_vec!(
        "threshold_p2p_peer_rtt_ms",
        "Last ping round-trip time per peer in milliseconds",
        &["peer"]
    )
    .expect("Failed to register threshold_p2p_peer_rtt_ms metric");
}

fn outcome(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

/// Record keysign round latency
pub fn record_sign_latency(elapsed: Duration, success: bool) {
    SIGN_LATENCY
        .with_label_values(&[outcome(success)])
        .observe(elapsed.as_secs_f64());
}

/// Count a blame against every accused node
pub fn record_blame<'a>(pubkeys: impl IntoIterator<Item = &'a str>) {
    for pubkey in pubkeys {
        NODE_BLAME.with_label_values(&[pubkey]).inc();
    }
}

pub fn record_keygen_attempt(success: bool) {
    KEYGEN_ATTEMPTS.with_label_values(&[outcome(success)]).inc();
}

pub fn set_peer_rtt(peer: &str, rtt_ms: i64) {
    PEER_RTT_MS.with_label_values(&[peer]).set(rtt_ms);
}
