//! Prometheus metrics for the outbound connection pool and the inbound
//! gateway.
//!
//! Naming follows [Prometheus best practices](https://prometheus.io/docs/practices/naming/):
//! - **Counters**: suffix `_total`
//! - **Gauges**: descriptive names, no `_total`
//!
//! [`PoolMetrics`] counters map one-to-one onto the metric names §3/§4.1 of
//! the pool design specify: `request_conn`, `reuse_conn`, `create_new_conn`,
//! `create_conn_succeeded`, `create_conn_failed`,
//! `conn_taken_from_pool_not_open`, `max_conns_per_host_exceeded`, plus the
//! three gauges tracked per origin (`conns_in_pool`, `conns_in_use`,
//! `conn_creations_in_progress`). [`GatewayMetrics`] covers the inbound
//! request/response side: requests received, responses written, and
//! decode rejections.

use prometheus::{register_counter_vec, register_gauge_vec, CounterVec, GaugeVec};
use std::sync::OnceLock;

/// Global pool metrics. Set on first use via [`pool_metrics`]; registration
/// only happens once even under concurrent callers from multiple origins'
/// pools, since all origins share one label-partitioned metric family.
static POOL_METRICS: OnceLock<PoolMetrics> = OnceLock::new();

/// Per-origin pool counters and gauges, label-partitioned by `origin`.
#[derive(Debug)]
pub struct PoolMetrics {
    request_conn: CounterVec,
    reuse_conn: CounterVec,
    create_new_conn: CounterVec,
    create_conn_succeeded: CounterVec,
    create_conn_failed: CounterVec,
    conn_taken_from_pool_not_open: CounterVec,
    max_conns_per_host_exceeded: CounterVec,
    conns_in_pool: GaugeVec,
    conns_in_use: GaugeVec,
    conn_creations_in_progress: GaugeVec,
}

impl PoolMetrics {
    fn new() -> Self {
        let labels = &["origin"];
        Self {
            request_conn: register_counter_vec!(
                "viaduct_pool_request_conn_total",
                "Acquire calls received, per origin",
                labels
            )
            .expect("register viaduct_pool_request_conn_total"),
            reuse_conn: register_counter_vec!(
                "viaduct_pool_reuse_conn_total",
                "Acquire calls satisfied from the idle pool",
                labels
            )
            .expect("register viaduct_pool_reuse_conn_total"),
            create_new_conn: register_counter_vec!(
                "viaduct_pool_create_new_conn_total",
                "Fresh origin connects dispatched",
                labels
            )
            .expect("register viaduct_pool_create_new_conn_total"),
            create_conn_succeeded: register_counter_vec!(
                "viaduct_pool_create_conn_succeeded_total",
                "Origin connects that completed successfully",
                labels
            )
            .expect("register viaduct_pool_create_conn_succeeded_total"),
            create_conn_failed: register_counter_vec!(
                "viaduct_pool_create_conn_failed_total",
                "Origin connects that failed",
                labels
            )
            .expect("register viaduct_pool_create_conn_failed_total"),
            conn_taken_from_pool_not_open: register_counter_vec!(
                "viaduct_pool_conn_taken_from_pool_not_open_total",
                "Idle connections popped from the pool but found dead",
                labels
            )
            .expect("register viaduct_pool_conn_taken_from_pool_not_open_total"),
            max_conns_per_host_exceeded: register_counter_vec!(
                "viaduct_pool_max_conns_per_host_exceeded_total",
                "Acquire calls rejected by the per-host connection ceiling",
                labels
            )
            .expect("register viaduct_pool_max_conns_per_host_exceeded_total"),
            conns_in_pool: register_gauge_vec!(
                "viaduct_pool_conns_in_pool",
                "Idle connections currently held by the pool",
                labels
            )
            .expect("register viaduct_pool_conns_in_pool"),
            conns_in_use: register_gauge_vec!(
                "viaduct_pool_conns_in_use",
                "Connections currently serving a request",
                labels
            )
            .expect("register viaduct_pool_conns_in_use"),
            conn_creations_in_progress: register_gauge_vec!(
                "viaduct_pool_conn_creations_in_progress",
                "Connects dispatched but not yet completed",
                labels
            )
            .expect("register viaduct_pool_conn_creations_in_progress"),
        }
    }

    pub fn incr_request_conn(&self, origin: &str) {
        self.request_conn.with_label_values(&[origin]).inc();
    }
    pub fn incr_reuse_conn(&self, origin: &str) {
        self.reuse_conn.with_label_values(&[origin]).inc();
    }
    pub fn incr_create_new_conn(&self, origin: &str) {
        self.create_new_conn.with_label_values(&[origin]).inc();
    }
    pub fn incr_create_conn_succeeded(&self, origin: &str) {
        self.create_conn_succeeded.with_label_values(&[origin]).inc();
    }
    pub fn incr_create_conn_failed(&self, origin: &str) {
        self.create_conn_failed.with_label_values(&[origin]).inc();
    }
    pub fn incr_conn_taken_from_pool_not_open(&self, origin: &str) {
        self.conn_taken_from_pool_not_open
            .with_label_values(&[origin])
            .inc();
    }
    pub fn incr_max_conns_per_host_exceeded(&self, origin: &str) {
        self.max_conns_per_host_exceeded
            .with_label_values(&[origin])
            .inc();
    }
    pub fn set_conns_in_pool(&self, origin: &str, value: i64) {
        self.conns_in_pool.with_label_values(&[origin]).set(value as f64);
    }
    pub fn set_conns_in_use(&self, origin: &str, value: i64) {
        self.conns_in_use.with_label_values(&[origin]).set(value as f64);
    }
    pub fn set_conn_creations_in_progress(&self, origin: &str, value: i64) {
        self.conn_creations_in_progress
            .with_label_values(&[origin])
            .set(value as f64);
    }
}

/// Returns the global pool metrics, registering them with the default
/// Prometheus registry on first call.
pub fn pool_metrics() -> &'static PoolMetrics {
    POOL_METRICS.get_or_init(PoolMetrics::new)
}

static GATEWAY_METRICS: OnceLock<GatewayMetrics> = OnceLock::new();

/// Per-request inbound gateway counters, label-partitioned by HTTP method
/// (requests) or status class (responses).
#[derive(Debug)]
pub struct GatewayMetrics {
    requests_received: CounterVec,
    responses_written: CounterVec,
    requests_rejected: CounterVec,
}

impl GatewayMetrics {
    fn new() -> Self {
        Self {
            requests_received: register_counter_vec!(
                "viaduct_gateway_requests_received_total",
                "Inbound requests decoded, per HTTP method",
                &["method"]
            )
            .expect("register viaduct_gateway_requests_received_total"),
            responses_written: register_counter_vec!(
                "viaduct_gateway_responses_written_total",
                "Responses written to the client, per status class",
                &["status_class"]
            )
            .expect("register viaduct_gateway_responses_written_total"),
            requests_rejected: register_counter_vec!(
                "viaduct_gateway_requests_rejected_total",
                "Inbound requests that failed decoding",
                &["reason"]
            )
            .expect("register viaduct_gateway_requests_rejected_total"),
        }
    }

    pub fn incr_requests_received(&self, method: &str) {
        self.requests_received.with_label_values(&[method]).inc();
    }

    /// `status_class` is e.g. `"2xx"`/`"4xx"`/`"5xx"`, per
    /// [`status_class`].
    pub fn incr_responses_written(&self, status_class: &str) {
        self.responses_written.with_label_values(&[status_class]).inc();
    }

    pub fn incr_requests_rejected(&self, reason: &str) {
        self.requests_rejected.with_label_values(&[reason]).inc();
    }
}

/// Maps an HTTP status code onto the `"Nxx"` label Prometheus convention
/// expects, avoiding one time series per distinct status code.
#[must_use]
pub fn status_class(status: u16) -> &'static str {
    match status / 100 {
        1 => "1xx",
        2 => "2xx",
        3 => "3xx",
        4 => "4xx",
        5 => "5xx",
        _ => "other",
    }
}

/// Returns the global gateway metrics, registering them with the default
/// Prometheus registry on first call.
pub fn gateway_metrics() -> &'static GatewayMetrics {
    GATEWAY_METRICS.get_or_init(GatewayMetrics::new)
}

/// Gather all metrics into Prometheus text format, for a scrape endpoint.
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("encode prometheus metrics");
    String::from_utf8(buffer).expect("prometheus text encoding is valid utf8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_label_partitioned_per_origin() {
        let metrics = pool_metrics();
        metrics.incr_request_conn("origin-a.internal:80");
        metrics.incr_request_conn("origin-a.internal:80");
        metrics.incr_reuse_conn("origin-b.internal:80");

        let text = gather_metrics();
        assert!(text.contains("viaduct_pool_request_conn_total"));
        assert!(text.contains("origin-a.internal:80"));
    }

    #[test]
    fn status_class_buckets_by_hundreds_digit() {
        assert_eq!(status_class(200), "2xx");
        assert_eq!(status_class(401), "4xx");
        assert_eq!(status_class(503), "5xx");
    }

    #[test]
    fn gateway_counters_are_label_partitioned() {
        let metrics = gateway_metrics();
        metrics.incr_requests_received("get");
        metrics.incr_responses_written(status_class(200));
        metrics.incr_requests_rejected("decode_error");

        let text = gather_metrics();
        assert!(text.contains("viaduct_gateway_requests_received_total"));
        assert!(text.contains("viaduct_gateway_responses_written_total"));
        assert!(text.contains("viaduct_gateway_requests_rejected_total"));
    }
}
