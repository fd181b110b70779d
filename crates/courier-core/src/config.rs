//! Config - `COURIER_*` 環境変数からの設定読み込み（envy）
//!
//! | 変数 | デフォルト |
//! |---|---|
//! | `COURIER_QUEUE` | `default` |
//! | `COURIER_CONCURRENCY` | `10` |
//! | `COURIER_POLL_INTERVAL_MS` | `250` |
//! | `COURIER_SHUTDOWN_GRACE_MS` | `30000` |
//! | `COURIER_STORE_BACKOFF_MS` | `1000` |
//! | `COURIER_DEFAULT_MAX_ATTEMPTS` | `3` |
//! | `COURIER_RETRY_BASE_MS` | `2000` |
//! | `COURIER_RETRY_MAX_MS` | `86400000` |
//! | `COURIER_STORE_PATH` | 未設定（in-memory store） |
//! | `COURIER_COMPLETED_RETENTION_MS` | 未設定（completed を保持し続ける） |
//! | `COURIER_LOG_FORMAT` | `text`（または `json`） |

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::app::PoolConfig;
use crate::domain::{CourierError, ExponentialBackoff, QueueName, Result};
use crate::observability::LogFormat;

pub const ENV_PREFIX: &str = "COURIER_";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub queue: String,
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    pub shutdown_grace_ms: u64,
    pub store_backoff_ms: u64,
    pub default_max_attempts: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    pub store_path: Option<PathBuf>,
    pub completed_retention_ms: Option<u64>,
    pub log_format: LogFormat,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            queue: QueueName::DEFAULT.to_string(),
            concurrency: 10,
            poll_interval_ms: 250,
            shutdown_grace_ms: 30_000,
            store_backoff_ms: 1_000,
            default_max_attempts: 3,
            retry_base_ms: 2_000,
            retry_max_ms: 86_400_000,
            store_path: None,
            completed_retention_ms: None,
            log_format: LogFormat::Text,
        }
    }
}

impl CourierConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Load from explicit key/value pairs. Keys without the prefix are ignored.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::prefixed(ENV_PREFIX).from_iter(vars)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(CourierError::Config(
                "COURIER_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        if self.default_max_attempts == 0 {
            return Err(CourierError::Config(
                "COURIER_DEFAULT_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.queue.trim().is_empty() {
            return Err(CourierError::Config("COURIER_QUEUE is empty".to_string()));
        }
        Ok(())
    }

    pub fn pool_config(&self) -> PoolConfig {
        let config = PoolConfig::new(self.queue.as_str(), self.concurrency)
            .poll_interval(Duration::from_millis(self.poll_interval_ms))
            .shutdown_grace(Duration::from_millis(self.shutdown_grace_ms))
            .store_backoff(Duration::from_millis(self.store_backoff_ms));
        match self.completed_retention_ms {
            Some(ms) => config.completed_retention(Duration::from_millis(ms)),
            None => config,
        }
    }

    pub fn retry_policy(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(self.retry_base_ms),
            2.0,
            Duration::from_millis(self.retry_max_ms),
        )
    }
}
