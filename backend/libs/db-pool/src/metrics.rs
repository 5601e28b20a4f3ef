//! Prometheus metrics for database connection bring-up and pool state

use prometheus::{register_int_counter_vec, register_int_gauge_vec, IntCounterVec, IntGaugeVec};
use sqlx::PgPool;

lazy_static::lazy_static! {
    /// Pool connection count by state (idle/active)
    static ref DB_POOL_CONNECTIONS: IntGaugeVec = register_int_gauge_vec!(
        "db_pool_connections",
        "Database pool connection count by state",
        &["service", "state"]
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Connection attempts made while bringing the pool up
    static ref DB_POOL_CONNECT_ATTEMPTS: IntCounterVec = register_int_counter_vec!(
        "db_pool_connect_attempts_total",
        "Database connection attempts segmented by outcome",
        &["service", "result"]
    ).expect("Prometheus metrics registration should succeed at startup");
}

/// Snapshot the pool's idle/active split
pub(crate) fn update_pool_metrics(pool: &PgPool, service: &str) {
    let size = pool.size() as i64;
    let idle = pool.num_idle() as i64;

    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "idle"])
        .set(idle);
    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "active"])
        .set(size - idle);
}

pub(crate) fn record_connect_attempt(service: &str, success: bool) {
    let result = if success { "success" } else { "error" };
    DB_POOL_CONNECT_ATTEMPTS
        .with_label_values(&[service, result])
        .inc();
}
