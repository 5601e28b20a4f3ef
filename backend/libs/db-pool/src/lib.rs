//! Database connection pool management
//!
//! Provides Postgres pool creation, environment-driven configuration and a
//! retrying bring-up loop for services that start before their database.

pub mod env_utils;
mod metrics;

use env_utils::{parse_env_required, parse_env_with_default};
use metrics::{record_connect_attempt, update_pool_metrics};

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Database connection pool configuration
#[derive(Clone)]
pub struct DbConfig {
    /// Service name for metrics labeling
    pub service_name: String,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Maximum number of connections
    pub max_connections: u32,
    /// Minimum number of idle connections kept ready
    pub min_connections: u32,
    /// Timeout for verifying a freshly created pool
    pub connect_timeout_secs: u64,
    /// Connection acquisition timeout (get connection from pool)
    pub acquire_timeout_secs: u64,
    /// Connection idle timeout
    pub idle_timeout_secs: u64,
    /// Connection maximum lifetime
    pub max_lifetime_secs: u64,
    /// Attempts made by [`connect_with_retry`] before giving up
    pub connect_retries: u32,
    /// Pause between two bring-up attempts
    pub retry_delay_secs: u64,
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("service_name", &self.service_name)
            .field("database_url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("acquire_timeout_secs", &self.acquire_timeout_secs)
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .field("max_lifetime_secs", &self.max_lifetime_secs)
            .field("connect_retries", &self.connect_retries)
            .field("retry_delay_secs", &self.retry_delay_secs)
            .finish()
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            service_name: String::from("unknown"),
            database_url: String::new(),
            max_connections: 25,
            min_connections: 5,
            connect_timeout_secs: 5,
            acquire_timeout_secs: 10,
            idle_timeout_secs: 600,
            max_lifetime_secs: 300,
            connect_retries: 30,
            retry_delay_secs: 2,
        }
    }
}

impl DbConfig {
    /// Create a new DbConfig from environment variables.
    ///
    /// `DATABASE_URL` is required; every other knob falls back to
    /// [`DbConfig::default`].
    pub fn from_env(service_name: &str) -> Result<Self, String> {
        let defaults = Self::default();
        let database_url: String = parse_env_required("DATABASE_URL")?;

        Ok(Self {
            service_name: service_name.to_string(),
            database_url,
            max_connections: parse_env_with_default("DB_MAX_CONNECTIONS", defaults.max_connections),
            min_connections: parse_env_with_default("DB_MIN_CONNECTIONS", defaults.min_connections),
            connect_timeout_secs: parse_env_with_default(
                "DB_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout_secs,
            ),
            acquire_timeout_secs: parse_env_with_default(
                "DB_ACQUIRE_TIMEOUT_SECS",
                defaults.acquire_timeout_secs,
            ),
            idle_timeout_secs: parse_env_with_default(
                "DB_IDLE_TIMEOUT_SECS",
                defaults.idle_timeout_secs,
            ),
            max_lifetime_secs: parse_env_with_default(
                "DB_MAX_LIFETIME_SECS",
                defaults.max_lifetime_secs,
            ),
            connect_retries: parse_env_with_default("DB_CONNECT_RETRIES", defaults.connect_retries),
            retry_delay_secs: parse_env_with_default(
                "DB_RETRY_DELAY_SECS",
                defaults.retry_delay_secs,
            ),
        })
    }

    /// Log pool configuration details
    pub fn log_config(&self) {
        info!(
            service = %self.service_name,
            max_connections = self.max_connections,
            min_connections = self.min_connections,
            acquire_timeout_secs = self.acquire_timeout_secs,
            idle_timeout_secs = self.idle_timeout_secs,
            max_lifetime_secs = self.max_lifetime_secs,
            connect_retries = self.connect_retries,
            "Database pool configuration"
        );
    }
}

/// Create a PostgreSQL connection pool and verify it with a round trip.
pub async fn create_pool(config: &DbConfig) -> Result<PgPool, sqlx::Error> {
    debug!(
        service = %config.service_name,
        max = config.max_connections,
        min = config.min_connections,
        "Creating database pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
        .test_before_acquire(true)
        .connect(&config.database_url)
        .await?;

    match tokio::time::timeout(
        Duration::from_secs(config.connect_timeout_secs),
        sqlx::query("SELECT 1").execute(&pool),
    )
    .await
    {
        Ok(Ok(_)) => {
            update_pool_metrics(&pool, &config.service_name);
            info!(
                service = %config.service_name,
                "Database pool created and verified successfully"
            );
            Ok(pool)
        }
        Ok(Err(e)) => {
            pool.close().await;
            Err(e)
        }
        Err(_) => {
            pool.close().await;
            Err(sqlx::Error::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Database verification timeout",
            )))
        }
    }
}

/// Bring a pool up, retrying while the database is not reachable yet.
///
/// Makes at most `connect_retries` attempts (at least one), sleeping
/// `retry_delay_secs` between them. The last error is returned once the
/// attempts are exhausted.
pub async fn connect_with_retry(config: &DbConfig) -> Result<PgPool, sqlx::Error> {
    let attempts = config.connect_retries.max(1);
    let delay = Duration::from_secs(config.retry_delay_secs);
    let mut attempt = 1;

    loop {
        match create_pool(config).await {
            Ok(pool) => {
                record_connect_attempt(&config.service_name, true);
                if attempt > 1 {
                    info!(
                        service = %config.service_name,
                        attempt,
                        "Connected to database after retrying"
                    );
                }
                return Ok(pool);
            }
            Err(e) if attempt < attempts => {
                record_connect_attempt(&config.service_name, false);
                warn!(
                    service = %config.service_name,
                    attempt,
                    max_attempts = attempts,
                    error = %e,
                    "Failed to connect to database, retrying"
                );
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                record_connect_attempt(&config.service_name, false);
                error!(
                    service = %config.service_name,
                    attempts,
                    error = %e,
                    "Failed to connect to database, giving up"
                );
                return Err(e);
            }
        }
    }
}
