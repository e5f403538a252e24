use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "bitswap_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "bitswap_query_duration_seconds";

/// Counter: ledger booking checks. Labels: outcome.
pub const BOOKING_VALIDATIONS_TOTAL: &str = "bitswap_booking_validations_total";

/// Counter: advisory checks run by booking sessions. Labels: outcome.
pub const SESSION_VALIDATIONS_TOTAL: &str = "bitswap_session_validations_total";

/// Counter: calls to the marketplace REST backend. Labels: op, status.
pub const BACKEND_REQUESTS_TOTAL: &str = "bitswap_backend_requests_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "bitswap_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "bitswap_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "bitswap_connections_rejected_total";

/// Gauge: items currently listed.
pub const ITEMS_ACTIVE: &str = "bitswap_items_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "bitswap_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "bitswap_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertItem { .. } => "insert_item",
        Command::UpdateItem { .. } => "update_item",
        Command::DeleteItem { .. } => "delete_item",
        Command::InsertBooking { .. } => "insert_booking",
        Command::UpdateBookingStatus { .. } => "update_booking_status",
        Command::SelectItems { .. } => "select_items",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectQuote { .. } => "select_quote",
        Command::SelectCalendar { .. } => "select_calendar",
    }
}
