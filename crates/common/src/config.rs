//! Node configuration: defaults, then an optional file, then environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Protocol version tag passed to every ceremony.
pub const PROTOCOL_VERSION: &str = "0.14.0";

/// Historic switch for blame submission on keysign failure.
pub const ENV_POST_BLAME: &str = "POST_BLAME";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NodeConfig {
    pub logging: LoggingConfig,
    pub signing: SigningConfig,
    pub keygen: KeygenConfig,
    pub health: HealthConfig,
    pub bitcoin: BitcoinConfig,
    pub keystore: KeystoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Maximum number of keysign ceremonies in flight.
    pub max_pending_signatures: usize,
    pub cache_capacity: usize,
    pub post_blame: bool,
    pub protocol_version: String,
    pub keysign_timeout_secs: u64,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            max_pending_signatures: 5,
            cache_capacity: 512,
            post_blame: false,
            protocol_version: PROTOCOL_VERSION.to_string(),
            keysign_timeout_secs: 30,
        }
    }
}

impl SigningConfig {
    pub fn keysign_timeout(&self) -> Duration {
        Duration::from_secs(self.keysign_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeygenConfig {
    pub tick_interval_ms: u64,
    pub keygen_timeout_secs: u64,
    pub algo: String,
}

impl Default for KeygenConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            keygen_timeout_secs: 300,
            algo: "ecdsa".to_string(),
        }
    }
}

impl KeygenConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn keygen_timeout(&self) -> Duration {
        Duration::from_secs(self.keygen_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub ping_interval_secs: u64,
    pub ping_timeout_secs: u64,
    pub peer_count_interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 30,
            ping_timeout_secs: 5,
            peer_count_interval_secs: 30,
        }
    }
}

impl HealthConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    pub fn peer_count_interval(&self) -> Duration {
        Duration::from_secs(self.peer_count_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BitcoinConfig {
    pub chain_id: i64,
    pub max_inputs_per_tx: usize,
    pub broadcast_retries: u32,
    pub broadcast_backoff_ms: u64,
    pub fee_bump_wait_blocks: u64,
    pub stuck_check_interval_secs: u64,
}

impl Default for BitcoinConfig {
    fn default() -> Self {
        Self {
            chain_id: 8332,
            max_inputs_per_tx: 20,
            broadcast_retries: 5,
            broadcast_backoff_ms: 1000,
            fee_bump_wait_blocks: 3,
            stuck_check_interval_secs: 30,
        }
    }
}

impl BitcoinConfig {
    pub fn broadcast_backoff(&self) -> Duration {
        Duration::from_millis(self.broadcast_backoff_ms)
    }

    pub fn stuck_check_interval(&self) -> Duration {
        Duration::from_secs(self.stuck_check_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoreConfig {
    pub tss_path: PathBuf,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            tss_path: PathBuf::from(".tss"),
        }
    }
}

impl NodeConfig {
    /// Load defaults, overlay `path` if it exists, then apply environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut node_config = NodeConfig::default();

        if let Some(path) = path.filter(|p| p.exists()) {
            let settings = config::Config::builder()
                .add_source(config::File::from(path))
                .build()
                .map_err(|e| ConfigError::File(format!("{}: {}", path.display(), e)))?;

            node_config = settings
                .try_deserialize::<NodeConfig>()
                .map_err(|e| ConfigError::File(format!("{}: {}", path.display(), e)))?;
        }

        node_config.override_from_env(|key| std::env::var(key).ok())?;
        node_config.validate()?;
        Ok(node_config)
    }

    /// Apply overrides from `lookup`, usually `std::env::var`.
    pub fn override_from_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("THRESHOLD_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(json) = lookup("THRESHOLD_LOG_JSON") {
            self.logging.json = parse_flag("THRESHOLD_LOG_JSON", &json)?;
        }

        if let Some(max) = lookup("THRESHOLD_MAX_PENDING_SIGNATURES") {
            self.signing.max_pending_signatures = max.parse().map_err(|e| {
                ConfigError::Invalid(format!("THRESHOLD_MAX_PENDING_SIGNATURES: {}", e))
            })?;
        }

        if let Some(flag) = lookup(ENV_POST_BLAME) {
            self.signing.post_blame = parse_flag(ENV_POST_BLAME, &flag)?;
        }

        if let Some(path) = lookup("THRESHOLD_TSS_PATH") {
            self.keystore.tss_path = PathBuf::from(path);
        }

        if let Some(chain_id) = lookup("THRESHOLD_BTC_CHAIN_ID") {
            self.bitcoin.chain_id = chain_id
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("THRESHOLD_BTC_CHAIN_ID: {}", e)))?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signing.max_pending_signatures == 0 {
            return Err(ConfigError::Invalid(
                "max_pending_signatures must be at least 1".to_string(),
            ));
        }

        if self.signing.cache_capacity == 0 {
            return Err(ConfigError::Invalid(
                "cache_capacity must be at least 1".to_string(),
            ));
        }

        let periods = [
            ("signing.keysign_timeout_secs", self.signing.keysign_timeout_secs),
            ("keygen.tick_interval_ms", self.keygen.tick_interval_ms),
            ("keygen.keygen_timeout_secs", self.keygen.keygen_timeout_secs),
            ("health.ping_interval_secs", self.health.ping_interval_secs),
            ("health.ping_timeout_secs", self.health.ping_timeout_secs),
            ("health.peer_count_interval_secs", self.health.peer_count_interval_secs),
            ("bitcoin.stuck_check_interval_secs", self.bitcoin.stuck_check_interval_secs),
        ];
        if let Some((key, _)) = periods.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{} cannot be 0", key)));
        }

        if self.health.ping_timeout_secs >= self.health.ping_interval_secs {
            return Err(ConfigError::Invalid(format!(
                "ping timeout {}s must be shorter than ping interval {}s",
                self.health.ping_timeout_secs, self.health.ping_interval_secs
            )));
        }

        if self.bitcoin.max_inputs_per_tx == 0 {
            return Err(ConfigError::Invalid(
                "max_inputs_per_tx must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::Invalid(format!("{}: not a boolean: {}", key, other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = NodeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.signing.max_pending_signatures, 5);
        assert_eq!(config.signing.protocol_version, PROTOCOL_VERSION);
        assert_eq!(config.health.ping_timeout(), Duration::from_secs(5));
        assert_eq!(config.keygen.tick_interval(), Duration::from_secs(1));
        assert!(!config.signing.post_blame);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = NodeConfig::default();
        config
            .override_from_env(env(&[
                ("POST_BLAME", "true"),
                ("THRESHOLD_MAX_PENDING_SIGNATURES", "2"),
                ("THRESHOLD_BTC_CHAIN_ID", "18444"),
            ]))
            .unwrap();

        assert!(config.signing.post_blame);
        assert_eq!(config.signing.max_pending_signatures, 2);
        assert_eq!(config.bitcoin.chain_id, 18444);
    }

    #[test]
    fn test_bad_env_value_rejected() {
        let mut config = NodeConfig::default();
        let err = config
            .override_from_env(env(&[("POST_BLAME", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = NodeConfig::default();
        config.signing.max_pending_signatures = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_intervals_rejected() {
        let cases: [fn(&mut NodeConfig); 4] = [
            |c| c.keygen.tick_interval_ms = 0,
            |c| c.health.ping_interval_secs = 0,
            |c| c.health.peer_count_interval_secs = 0,
            |c| c.bitcoin.stuck_check_interval_secs = 0,
        ];
        for zero_out in cases {
            let mut config = NodeConfig::default();
            zero_out(&mut config);
            let err = config.validate().unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("cannot be 0")));
        }
    }

    #[test]
    fn test_timeout_must_be_below_interval() {
        let mut config = NodeConfig::default();
        config.health.ping_timeout_secs = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[signing]\nmax_pending_signatures = 3\n\n[keygen]\ntick_interval_ms = 250").unwrap();

        let config = NodeConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.signing.max_pending_signatures, 3);
        assert_eq!(config.signing.cache_capacity, 512);
        assert_eq!(config.keygen.tick_interval(), Duration::from_millis(250));
    }
}
