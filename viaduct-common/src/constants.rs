//! Shared defaults for connection-pool and metrics configuration.
//!
//! Use these instead of magic numbers so defaults stay consistent across
//! the pool and HTTP crates.

/// Default idle timeout for a pooled origin connection, in milliseconds.
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 30_000;

/// Default cap on concurrent connections to one origin. `-1` (via
/// [`ConnectionPoolConfig`](../../viaduct_pool/struct.ConnectionPoolConfig.html))
/// disables the cap; this constant is the positive default when a host
/// does want one.
pub const DEFAULT_MAX_CONNECTIONS_PER_HOST: i64 = 200;

/// Default per-event-loop idle-pool high-water-mark.
pub const DEFAULT_PER_SERVER_WATERLINE: i64 = 50;

/// Default port for the metrics endpoint (e.g. Prometheus scrape target).
pub const DEFAULT_METRICS_PORT: u16 = 9090;
