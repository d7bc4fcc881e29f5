use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Top-level configuration, deserializable from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HeraldConfig {
    pub server: ServerConfig,
    pub dispatcher: DispatcherConfig,
    pub store: StoreConfig,
}

/// Server configuration (HTTP listen address).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
}

/// Poll loop configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Delay between the end of one poll cycle and the start of the next.
    pub poll_interval_ms: u64,
    /// Time-to-live of the per-message lock key. Must comfortably exceed the
    /// time an emission takes, or a second dispatcher may claim the message.
    pub lock_ttl_ms: u64,
    /// Per-call store timeout inside a poll cycle. `0` disables it.
    pub store_timeout_ms: u64,
}

/// Which backend holds the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Rocksdb,
    Redis,
}

/// Store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// RocksDB data directory.
    pub data_dir: String,
    pub redis_url: String,
}

impl HeraldConfig {
    /// Parse a TOML document and validate it.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: HeraldConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.dispatcher.validate()
    }
}

impl DispatcherConfig {
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
    pub const DEFAULT_LOCK_TTL_MS: u64 = 5000;

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn store_timeout(&self) -> Option<Duration> {
        (self.store_timeout_ms > 0).then(|| Duration::from_millis(self.store_timeout_ms))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "dispatcher.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.lock_ttl_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "dispatcher.lock_ttl_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: Self::DEFAULT_POLL_INTERVAL_MS,
            lock_ttl_ms: Self::DEFAULT_LOCK_TTL_MS,
            store_timeout_ms: 0,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Rocksdb,
            data_dir: "data".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}
