//! Logging setup and structured events.
//!
//! Every crate logs through `tracing`. Long-running components additionally
//! emit [`LogEvent`]s for milestones an operator may want to alert on
//! (ceremony outcomes, blame submissions, stuck outbounds), so that log
//! aggregation can filter on a stable `event_type`.
//!
//! ```ignore
//! use common::observability::{init_tracing, EventType, LogEvent};
//!
//! init_tracing(&config.logging)?;
//! LogEvent::new(EventType::BlamePosted)
//!     .with_correlation_id(index)
//!     .with_context("chain_id", chain_id.to_string())
//!     .emit();
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::ConfigError;

/// Field names shared by log lines across crates.
pub mod fields {
    pub const CHAIN_ID: &str = "chain_id";
    pub const NONCE: &str = "nonce";
    pub const HEIGHT: &str = "height";
    pub const PEER: &str = "peer";
    pub const TX_HASH: &str = "tx_hash";
    pub const BLAME_INDEX: &str = "blame_index";
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| ConfigError::Invalid(format!("log level {}: {}", config.level, e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    result.map_err(|e| ConfigError::Invalid(format!("tracing already initialised: {}", e)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Keysign
    KeysignStarted,
    KeysignCompleted,
    KeysignFailed,
    SignatureRejected,
    BlamePosted,
    BlamePostFailed,

    // Keygen
    KeygenStarted,
    KeygenVotedSuccess,
    KeygenVotedFailed,
    KeygenSelfTestFailed,

    // Peers
    PeerUnreachable,

    // Bitcoin outbound
    OutboundBroadcast,
    OutboundStuck,
    FeeBumpHeld,
    FeeBumped,
}

impl EventType {
    fn is_warning(&self) -> bool {
        matches!(
            self,
            EventType::KeysignFailed
                | EventType::SignatureRejected
                | EventType::BlamePosted
                | EventType::BlamePostFailed
                | EventType::KeygenVotedFailed
                | EventType::KeygenSelfTestFailed
                | EventType::PeerUnreachable
                | EventType::OutboundStuck
        )
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::KeysignStarted => "keysign_started",
            Self::KeysignCompleted => "keysign_completed",
            Self::KeysignFailed => "keysign_failed",
            Self::SignatureRejected => "signature_rejected",
            Self::BlamePosted => "blame_posted",
            Self::BlamePostFailed => "blame_post_failed",
            Self::KeygenStarted => "keygen_started",
            Self::KeygenVotedSuccess => "keygen_voted_success",
            Self::KeygenVotedFailed => "keygen_voted_failed",
            Self::KeygenSelfTestFailed => "keygen_self_test_failed",
            Self::PeerUnreachable => "peer_unreachable",
            Self::OutboundBroadcast => "outbound_broadcast",
            Self::OutboundStuck => "outbound_stuck",
            Self::FeeBumpHeld => "fee_bump_held",
            Self::FeeBumped => "fee_bumped",
        };
        write!(f, "{}", s)
    }
}

/// A structured log event with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub event_type: EventType,
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: u64,
    /// Correlation ID, e.g. a blame index or tx hash.
    pub correlation_id: Option<String>,
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub context: HashMap<String, String>,
    pub error: Option<String>,
}

impl LogEvent {
    pub fn new(event_type: EventType) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        Self {
            event_type,
            timestamp_ms,
            correlation_id: None,
            duration_ms: None,
            context: HashMap::new(),
            error: None,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = Some(duration.as_millis() as u64);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn emit(&self) {
        let json = serde_json::to_string(&self).unwrap_or_default();

        if self.event_type.is_warning() {
            tracing::warn!(event = %json, "observability_event");
        } else {
            tracing::info!(event = %json, "observability_event");
        }
    }
}
