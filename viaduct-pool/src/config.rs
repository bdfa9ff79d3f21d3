//! Immutable per-origin pool configuration.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Immutable record of pool tuning for one origin.
///
/// `max_connections_per_host < 0` disables the per-host connection ceiling;
/// `per_server_waterline < 0` disables the idle-pool high-water-mark (every
/// released connection is kept, never discarded for being "too many idle").
///
/// Derives `Serialize`/`Deserialize` so a host's own config loader
/// (excluded from this core per spec.md §1) can deserialize this type
/// directly out of whatever format it reads, without a duplicate DTO.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionPoolConfig {
    pub origin_name: String,
    pub idle_timeout_ms: u64,
    pub max_connections_per_host: i64,
    pub per_server_waterline: i64,
}

impl ConnectionPoolConfig {
    /// Start building a config for `origin_name`, pre-filled with the
    /// workspace defaults from `viaduct_common::constants`.
    #[must_use]
    pub fn builder(origin_name: impl Into<String>) -> ConnectionPoolConfigBuilder {
        ConnectionPoolConfigBuilder {
            origin_name: origin_name.into(),
            idle_timeout_ms: viaduct_common::DEFAULT_IDLE_TIMEOUT_MS,
            max_connections_per_host: viaduct_common::DEFAULT_MAX_CONNECTIONS_PER_HOST,
            per_server_waterline: viaduct_common::DEFAULT_PER_SERVER_WATERLINE,
        }
    }
}

/// Builder for [`ConnectionPoolConfig`]. The distilled spec only lists the
/// fields; a builder with validated defaults is the supplemental piece this
/// workspace adds (SPEC_FULL §0.1) so callers don't hand-construct the
/// struct and risk an inconsistent combination (e.g. a zero timeout).
#[derive(Debug, Clone)]
pub struct ConnectionPoolConfigBuilder {
    origin_name: String,
    idle_timeout_ms: u64,
    max_connections_per_host: i64,
    per_server_waterline: i64,
}

impl ConnectionPoolConfigBuilder {
    #[must_use]
    pub fn idle_timeout_ms(mut self, value: u64) -> Self {
        self.idle_timeout_ms = value;
        self
    }

    #[must_use]
    pub fn max_connections_per_host(mut self, value: i64) -> Self {
        self.max_connections_per_host = value;
        self
    }

    #[must_use]
    pub fn per_server_waterline(mut self, value: i64) -> Self {
        self.per_server_waterline = value;
        self
    }

    #[must_use]
    pub fn build(self) -> ConnectionPoolConfig {
        ConnectionPoolConfig {
            origin_name: self.origin_name,
            idle_timeout_ms: if self.idle_timeout_ms == 0 {
                viaduct_common::DEFAULT_IDLE_TIMEOUT_MS
            } else {
                self.idle_timeout_ms
            },
            max_connections_per_host: self.max_connections_per_host,
            per_server_waterline: self.per_server_waterline,
        }
    }

    #[must_use]
    pub fn build_arc(self) -> Arc<ConnectionPoolConfig> {
        Arc::new(self.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_and_deserializes_via_serde_json() {
        let cfg = ConnectionPoolConfig::builder("origin.internal")
            .max_connections_per_host(10)
            .per_server_waterline(5)
            .build();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ConnectionPoolConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.origin_name, cfg.origin_name);
        assert_eq!(back.max_connections_per_host, cfg.max_connections_per_host);
        assert_eq!(back.per_server_waterline, cfg.per_server_waterline);
    }

    #[test]
    fn builder_fills_in_defaults() {
        let cfg = ConnectionPoolConfig::builder("origin.internal").build();
        assert_eq!(cfg.origin_name, "origin.internal");
        assert_eq!(cfg.idle_timeout_ms, viaduct_common::DEFAULT_IDLE_TIMEOUT_MS);
        assert_eq!(cfg.max_connections_per_host, viaduct_common::DEFAULT_MAX_CONNECTIONS_PER_HOST);
    }

    #[test]
    fn builder_overrides_and_rejects_zero_timeout() {
        let cfg = ConnectionPoolConfig::builder("origin.internal")
            .max_connections_per_host(10)
            .per_server_waterline(5)
            .idle_timeout_ms(0)
            .build();
        assert_eq!(cfg.max_connections_per_host, 10);
        assert_eq!(cfg.per_server_waterline, 5);
        assert_eq!(cfg.idle_timeout_ms, viaduct_common::DEFAULT_IDLE_TIMEOUT_MS);
    }
}
