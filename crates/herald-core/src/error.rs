use std::time::Duration;

/// Failures of a store backend. Store calls never report domain conditions:
/// a lost lock race is `Ok(false)` and an unknown id is a no-op.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("rocksdb error: {0}")]
    RocksDb(String),

    #[error("redis error: {0}")]
    Redis(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("store state poisoned")]
    Poisoned,
}

impl From<rocksdb::Error> for StoreError {
    fn from(err: rocksdb::Error) -> Self {
        StoreError::RocksDb(err.into_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Redis(err.to_string())
        }
    }
}

/// Per-command error for scheduling a message.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid time: {0}")]
    InvalidTime(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised inside a single poll cycle. Never escape the poll loop.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config value: {0}")]
    InvalidValue(String),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
