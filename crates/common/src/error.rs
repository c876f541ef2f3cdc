use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to load config file {0}")]
    File(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Error that stopped a ticker.
#[derive(Error, Debug)]
pub enum TickerError {
    #[error("Ticker {name} cancelled")]
    Cancelled { name: String },

    #[error("Ticker {name} needs a non-zero interval")]
    ZeroInterval { name: String },

    #[error("Ticker {name} task failed: {source}")]
    Task {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
