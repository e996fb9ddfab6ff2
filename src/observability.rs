use std::net::SocketAddr;

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: bookings committed.
pub const BOOKINGS_CREATED_TOTAL: &str = "roombook_bookings_created_total";

/// Counter: create attempts rejected because the slot was already held.
pub const BOOKING_CONFLICTS_TOTAL: &str = "roombook_booking_conflicts_total";

/// Counter: bookings cancelled (deletes that removed a document).
pub const BOOKINGS_CANCELLED_TOTAL: &str = "roombook_bookings_cancelled_total";

/// Counter: client operations that failed. Labels: op, kind.
pub const BOOKING_ERRORS_TOTAL: &str = "roombook_booking_errors_total";

/// Histogram: create-booking latency in seconds, retries included.
pub const CREATE_DURATION_SECONDS: &str = "roombook_create_duration_seconds";

// ── Store internals ─────────────────────────────────────────────

/// Counter: commits rejected because the document changed after it was read.
pub const TRANSACTIONS_ABORTED_TOTAL: &str = "roombook_transactions_aborted_total";

/// Counter: transaction re-runs after an abort.
pub const TRANSACTION_RETRIES_TOTAL: &str = "roombook_transaction_retries_total";

/// Gauge: open partition watches.
pub const WATCHES_ACTIVE: &str = "roombook_watches_active";

/// Counter: full resyncs performed by live feeds.
pub const FEED_RESYNCS_TOTAL: &str = "roombook_feed_resyncs_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roombook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roombook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
