use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tracing_subscriber::{fmt, EnvFilter};

// ── Healer ──────────────────────────────────────────────────────

/// Counter: heal passes run.
pub const HEAL_PASSES_TOTAL: &str = "swatch_heal_passes_total";

/// Counter: transfers committed by the healer.
pub const HEAL_TRANSFERS_TOTAL: &str = "swatch_heal_transfers_total";

/// Histogram: meters moved by each committed transfer. Its sum is the total moved.
pub const HEAL_TRANSFER_METERS: &str = "swatch_heal_transfer_meters";

/// Counter: deficits with no roll to take them.
pub const HEAL_UNRESOLVED_TOTAL: &str = "swatch_heal_unresolved_total";

/// Counter: transfers given up after repeated write conflicts.
pub const HEAL_CONFLICTS_TOTAL: &str = "swatch_heal_conflicts_total";

/// Histogram: one heal pass, in seconds.
pub const HEAL_PASS_DURATION_SECONDS: &str = "swatch_heal_pass_duration_seconds";

/// Gauge: rolls still overbooked after the last inventory refresh.
pub const OVERBOOKED_ROLLS: &str = "swatch_overbooked_rolls";

// ── Allocation ──────────────────────────────────────────────────

/// Histogram: meters per Overbooked allocation line.
pub const ALLOCATION_OVERBOOKED_METERS: &str = "swatch_allocation_overbooked_meters";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "swatch_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "swatch_wal_flush_batch_size";

/// Counter: WAL compactions run by the maintenance loop.
pub const WAL_COMPACTIONS_TOTAL: &str = "swatch_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Log to stdout. `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(true).init();
}

/// Debug-level logging captured by the test harness. Safe to call repeatedly.
pub fn init_test_tracing() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
