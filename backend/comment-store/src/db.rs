//! Store bootstrap: schema migrations and backend construction.

use db_pool::connect_with_retry;
use sqlx::migrate::Migrator;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use crate::config::{StorageBackend, StoreConfig};
use crate::error::{StoreError, StoreResult};
use crate::storage::{InMemoryStorage, PostgresStorage, Storage};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply pending migrations. Already-applied ones are skipped.
pub async fn run_migrations(pool: &PgPool) -> StoreResult<()> {
    MIGRATOR.run(pool).await?;
    info!("Comment store migrations applied");
    Ok(())
}

/// Create the backend selected by `config`.
///
/// For Postgres this waits for the database (see
/// [`db_pool::connect_with_retry`]) and brings the schema up to date first.
pub async fn build_storage(config: &StoreConfig) -> StoreResult<Arc<dyn Storage>> {
    match config.backend {
        StorageBackend::Memory => {
            info!(backend = %config.backend, "Comment store initialised");
            Ok(Arc::new(InMemoryStorage::new()))
        }
        StorageBackend::Postgres => {
            let db_config = config.database.as_ref().ok_or_else(|| {
                StoreError::Config("postgres backend selected without database settings".into())
            })?;
            db_config.log_config();

            let pool = connect_with_retry(db_config).await?;
            run_migrations(&pool).await?;

            let storage = PostgresStorage::new(pool)
                .with_poll_interval(config.poll_interval)
                .with_subscription_buffer(config.subscription_buffer);
            info!(
                backend = %config.backend,
                poll_interval_ms = config.poll_interval.as_millis() as u64,
                subscription_buffer = config.subscription_buffer,
                "Comment store initialised"
            );
            Ok(Arc::new(storage))
        }
    }
}
