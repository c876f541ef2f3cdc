//! Ambient plumbing shared by every crate: configuration, logging and the
//! periodic task driver.

pub mod config;
pub mod error;
pub mod observability;
pub mod ticker;

pub use config::{
    BitcoinConfig, HealthConfig, KeygenConfig, KeystoreConfig, LoggingConfig, NodeConfig,
    SigningConfig, PROTOCOL_VERSION,
};
pub use error::{ConfigError, TickerError};
pub use observability::{init_tracing, EventType, LogEvent};
pub use ticker::{ScheduledTask, TaskError, Tick, Ticker};
