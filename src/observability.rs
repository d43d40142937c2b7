use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "roomhold_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "roomhold_query_duration_seconds";

/// Counter: reserve calls. Labels: outcome (created, existing, conflict).
pub const RESERVATIONS_TOTAL: &str = "roomhold_reservations_total";

/// Counter: successful confirm/cancel transitions. Labels: to.
pub const RESERVATION_TRANSITIONS_TOTAL: &str = "roomhold_reservation_transitions_total";

// ── Sweeper ─────────────────────────────────────────────────────

/// Counter: holds moved to EXPIRED by the sweeper.
pub const HOLDS_EXPIRED_TOTAL: &str = "roomhold_holds_expired_total";

/// Counter: sweeper ticks that failed to write.
pub const SWEEPER_FAILURES_TOTAL: &str = "roomhold_sweeper_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "roomhold_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "roomhold_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roomhold_connections_rejected_total";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "roomhold_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomhold_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (commits per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomhold_wal_flush_batch_size";

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

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertRoom { .. } => "insert_room",
        Command::UpdateRoom { .. } => "update_room",
        Command::SelectRooms { .. } => "select_rooms",
        Command::InsertTimeSlot { .. } => "insert_time_slot",
        Command::BatchInsertTimeSlots { .. } => "batch_insert_time_slots",
        Command::SelectTimeSlots { .. } => "select_time_slots",
        Command::SelectAvailableSlots { .. } => "select_available_slots",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::UpdateReservationStatus { .. } => "update_reservation_status",
        Command::SelectReservation { .. } => "select_reservation",
    }
}
