use std::net::SocketAddr;

use crate::status::Summary;

// ── Lifecycle metrics ───────────────────────────────────────────

/// Counter: lifecycle events emitted. Labels: event.
pub const TRANSITIONS_TOTAL: &str = "slotd_transitions_total";

/// Counter: operations rejected. Labels: op, kind.
pub const REJECTIONS_TOTAL: &str = "slotd_rejections_total";

/// Counter: timer callbacks that reached the engine. Labels: timer.
pub const TIMERS_FIRED_TOTAL: &str = "slotd_timers_fired_total";

/// Counter: timer callbacks discarded because the slot had moved on. Labels: timer.
pub const STALE_TIMERS_TOTAL: &str = "slotd_stale_timers_total";

/// Counter: slots forced back to free because a timer could not be armed.
pub const TIMER_FALLBACKS_TOTAL: &str = "slotd_timer_fallbacks_total";

/// Gauge: scheduled timers neither fired nor cancelled.
pub const TIMERS_LIVE: &str = "slotd_timers_live";

/// Gauge: slots per bucket. Labels: bucket.
pub const SLOTS: &str = "slotd_slots";

// ── Connection metrics ──────────────────────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotd_connections_rejected_total";

/// Counter: requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "slotd_requests_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

pub fn record_summary(summary: &Summary) {
    metrics::gauge!(SLOTS, "bucket" => "free").set(summary.free as f64);
    metrics::gauge!(SLOTS, "bucket" => "reserved").set(summary.reserved as f64);
    metrics::gauge!(SLOTS, "bucket" => "occupied").set(summary.occupied as f64);
}
