//! Ambient observability stack for the edge proxy core: Prometheus pool and
//! gateway metrics, plus `tracing`/OpenTelemetry span export. Kept as its
//! own crate so the pool and HTTP crates can depend on it optionally
//! behind a `metrics` feature, matching how the rest of the workspace
//! gates observability.

pub mod metrics;
pub mod tracing;

pub use metrics::{gather_metrics, gateway_metrics, pool_metrics, status_class, GatewayMetrics, PoolMetrics};
pub use tracing::{init_tracing, shutdown_tracing, TracingConfig};

/// Basic initialization for minimal overhead.
pub fn init_basic_observability(service_name: &str, enable_tracing: bool) {
    if enable_tracing {
        let _ = init_tracing(TracingConfig {
            service_name: service_name.to_string(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
        });
    } else {
        init_minimal_logging();
    }
}

/// Minimal logging setup without OpenTelemetry infrastructure. Use this for
/// latency-sensitive deployments where span export overhead matters.
pub fn init_minimal_logging() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
