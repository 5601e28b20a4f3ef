//! Store configuration loaded from the environment.

use db_pool::env_utils::{env_string_or, parse_env_with_default};
use db_pool::DbConfig;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{StoreError, StoreResult};
use crate::storage::postgres::{DEFAULT_POLL_INTERVAL, DEFAULT_SUBSCRIPTION_BUFFER};

/// Service name used for pool metrics and logs.
pub const SERVICE_NAME: &str = "comment-store";

/// Which backend `db::build_storage` creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

impl FromStr for StorageBackend {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" => Ok(Self::Postgres),
            other => Err(StoreError::Config(format!(
                "unsupported STORAGE_TYPE '{}', expected 'memory' or 'postgres'",
                other
            ))),
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Postgres => f.write_str("postgres"),
        }
    }
}

/// Comment store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Selected backend
    pub backend: StorageBackend,
    /// Change-feed poll interval for Postgres subscriptions
    pub poll_interval: Duration,
    /// Queue capacity of each Postgres subscription
    pub subscription_buffer: usize,
    /// Pool settings, present only for the Postgres backend
    pub database: Option<DbConfig>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            poll_interval: DEFAULT_POLL_INTERVAL,
            subscription_buffer: DEFAULT_SUBSCRIPTION_BUFFER,
            database: None,
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables, reading `.env` first
    /// when one exists.
    pub fn from_env() -> StoreResult<Self> {
        let _ = dotenvy::dotenv();

        let backend: StorageBackend = env_string_or("STORAGE_TYPE", "memory").parse()?;

        let poll_interval_ms = parse_env_with_default(
            "COMMENT_POLL_INTERVAL_MS",
            DEFAULT_POLL_INTERVAL.as_millis() as u64,
        );
        let subscription_buffer =
            parse_env_with_default("COMMENT_SUBSCRIPTION_BUFFER", DEFAULT_SUBSCRIPTION_BUFFER);

        let database = match backend {
            StorageBackend::Memory => None,
            StorageBackend::Postgres => {
                Some(DbConfig::from_env(SERVICE_NAME).map_err(StoreError::Config)?)
            }
        };

        Ok(Self {
            backend,
            poll_interval: Duration::from_millis(poll_interval_ms.max(1)),
            subscription_buffer: subscription_buffer.max(1),
            database,
        })
    }
}
