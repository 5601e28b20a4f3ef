//! Prometheus collectors for the comment store.
//!
//! Collectors are registered in the default registry so the host process can
//! expose them next to its own metrics.

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge_vec, IntCounter,
    IntCounterVec, IntGaugeVec,
};

use crate::error::StoreResult;

lazy_static! {
    /// Store operations by backend, operation and outcome.
    pub static ref STORE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "comment_store_operations_total",
        "Store operations segmented by backend, operation and result",
        &["backend", "operation", "result"]
    )
    .expect("failed to register comment_store_operations_total");

    /// Comment notifications dropped because a subscriber queue was full.
    pub static ref NOTIFICATIONS_DROPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "comment_store_notifications_dropped_total",
        "Comment notifications dropped on a full subscriber queue",
        &["backend"]
    )
    .expect("failed to register comment_store_notifications_dropped_total");

    /// Currently open comment subscriptions.
    pub static ref ACTIVE_SUBSCRIPTIONS: IntGaugeVec = register_int_gauge_vec!(
        "comment_store_active_subscriptions",
        "Open comment subscriptions segmented by backend",
        &["backend"]
    )
    .expect("failed to register comment_store_active_subscriptions");

    /// Poll ticks skipped because the change-feed query failed.
    pub static ref POLL_ERRORS_TOTAL: IntCounter = register_int_counter!(
        "comment_store_poll_errors_total",
        "Comment change-feed poll ticks skipped after a query failure"
    )
    .expect("failed to register comment_store_poll_errors_total");
}

/// Count an operation outcome and hand the result back unchanged.
pub(crate) fn observe<T>(backend: &str, operation: &str, result: StoreResult<T>) -> StoreResult<T> {
    let label = match &result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    STORE_OPERATIONS_TOTAL
        .with_label_values(&[backend, operation, label])
        .inc();
    result
}
