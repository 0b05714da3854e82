use std::net::SocketAddr;

use crate::wire::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "roomlet_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "roomlet_request_duration_seconds";

/// Counter: admission attempts. Labels: outcome (admitted or an error kind).
pub const ADMISSIONS_TOTAL: &str = "roomlet_admissions_total";

/// Counter: applied status transitions. Labels: to.
pub const STATUS_TRANSITIONS_TOTAL: &str = "roomlet_status_transitions_total";

/// Histogram: time spent waiting for a room's exclusion scope, in seconds.
pub const ROOM_LOCK_WAIT_SECONDS: &str = "roomlet_room_lock_wait_seconds";

/// Counter: admissions whose caller-supplied price differed from nights × rate.
pub const PRICE_MISMATCH_TOTAL: &str = "roomlet_price_mismatch_total";

// ── USE metrics (resource utilization) ──────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "roomlet_connections_active";

pub const CONNECTIONS_TOTAL: &str = "roomlet_connections_total";

pub const CONNECTIONS_REJECTED_TOTAL: &str = "roomlet_connections_rejected_total";

/// Gauge: bookings held in memory.
pub const BOOKINGS_LOADED: &str = "roomlet_bookings_loaded";

pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomlet_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomlet_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for a request variant.
pub fn op_label(req: &Request) -> &'static str {
    match req {
        Request::CreateBooking { .. } => "create_booking",
        Request::TransitionStatus { .. } => "transition_status",
        Request::SetStatus { .. } => "set_status",
        Request::CancelBooking { .. } => "cancel_booking",
        Request::GetBooking { .. } => "get_booking",
        Request::RoomBookings { .. } => "room_bookings",
        Request::CustomerBookings { .. } => "customer_bookings",
        Request::OwnerBookings { .. } => "owner_bookings",
        Request::BlockedNights { .. } => "blocked_nights",
        Request::CheckAvailability { .. } => "check_availability",
        Request::Quote { .. } => "quote",
        Request::Watch { .. } => "watch",
        Request::Unwatch { .. } => "unwatch",
    }
}
