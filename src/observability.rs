use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "classbook_http_requests_total";

/// Counter: engine transactions. Labels: operation, outcome (committed/rejected/conflict).
pub const TRANSACTIONS_TOTAL: &str = "classbook_transactions_total";

/// Counter: optimistic retries after a stale read. Labels: operation.
pub const TRANSACTION_RETRIES_TOTAL: &str = "classbook_transaction_retries_total";

/// Counter: bookings/reschedules refused by the conflict guard. Labels: reason.
pub const BOOKINGS_REJECTED_TOTAL: &str = "classbook_bookings_rejected_total";

/// Counter: lessons removed by bulk deletion.
pub const BULK_DELETED_TOTAL: &str = "classbook_bulk_deleted_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Counter: notification deliveries that failed.
pub const NOTIFICATIONS_FAILED_TOTAL: &str = "classbook_notifications_failed_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "classbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (commits per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "classbook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus exporter: {e}"),
    }
}
