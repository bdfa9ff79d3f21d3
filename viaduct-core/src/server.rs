//! Origin server identity and per-origin statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one origin endpoint the gateway proxies to.
///
/// Immutable once constructed. A [`Server`] may be a plain host/port pair or
/// a discovery-derived endpoint (e.g. resolved from a service registry);
/// both expose [`Server::host`] and [`Server::port`] uniformly so the pool
/// never has to branch on where a server came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Server {
    /// A statically configured origin.
    Plain { host: String, port: u16 },
    /// An origin resolved via service discovery. Carries the discovery
    /// backend's opaque id alongside the resolved host/port so callers can
    /// correlate pool activity back to a discovery record.
    Discovery {
        host: String,
        port: u16,
        discovery_id: String,
    },
}

impl Server {
    /// Construct a plain, statically configured origin.
    pub fn plain(host: impl Into<String>, port: u16) -> Self {
        Self::Plain {
            host: host.into(),
            port,
        }
    }

    /// Construct a discovery-derived origin.
    pub fn discovery(host: impl Into<String>, port: u16, discovery_id: impl Into<String>) -> Self {
        Self::Discovery {
            host: host.into(),
            port,
            discovery_id: discovery_id.into(),
        }
    }

    /// Origin hostname or IP literal, uniformly across variants.
    #[must_use]
    pub fn host(&self) -> &str {
        match self {
            Self::Plain { host, .. } | Self::Discovery { host, .. } => host,
        }
    }

    /// Origin port, uniformly across variants.
    #[must_use]
    pub fn port(&self) -> u16 {
        match self {
            Self::Plain { port, .. } | Self::Discovery { port, .. } => *port,
        }
    }

    /// `host:port`, convenient as a dial target or pool key display.
    #[must_use]
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host(), self.port())
    }
}

impl std::fmt::Display for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.authority())
    }
}

/// Mutable counters for one origin, updated by the pool only and read by
/// the load balancer (an external collaborator).
///
/// All fields are atomic so readers never block a pool thread; the pool is
/// the sole writer for each field but is itself accessed concurrently
/// across event loops (`remove`, `shutdown`, cross-loop `release`).
#[derive(Debug, Default)]
pub struct ServerStats {
    open_connections: AtomicU64,
    active_requests: AtomicU64,
    successive_failures: AtomicU64,
    total_failures: AtomicU64,
}

impl ServerStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_connections(&self) -> u64 {
        self.open_connections.load(Ordering::Relaxed)
    }

    pub fn active_requests(&self) -> u64 {
        self.active_requests.load(Ordering::Relaxed)
    }

    pub fn successive_failures(&self) -> u64 {
        self.successive_failures.load(Ordering::Relaxed)
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    // These mutators are `pub`, not `pub(crate)`: per §3, `ServerStats` is
    // "Updated by the pool only" — but the pool lives in a different crate
    // (`viaduct-pool`), so crate-private visibility would make it
    // uncallable from the one place that's supposed to call it. Read-only
    // access for the load balancer (also external, §3) is the other
    // direction this has to cross a crate boundary.

    pub fn incr_open_connections(&self) {
        self.open_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decr_open_connections(&self) {
        self.open_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn incr_active_requests(&self) {
        self.active_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decr_active_requests(&self) {
        self.active_requests.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a connect failure: bumps both the running streak and the
    /// lifetime total. A subsequent successful connect resets the streak
    /// via [`ServerStats::reset_successive_failures`].
    pub fn record_connect_failure(&self) {
        self.successive_failures.fetch_add(1, Ordering::Relaxed);
        self.total_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset_successive_failures(&self) {
        self.successive_failures.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_and_discovery_expose_host_port_uniformly() {
        let a = Server::plain("origin-a.internal", 8080);
        let b = Server::discovery("origin-b.internal", 9090, "disco-42");

        assert_eq!(a.host(), "origin-a.internal");
        assert_eq!(a.port(), 8080);
        assert_eq!(b.host(), "origin-b.internal");
        assert_eq!(b.port(), 9090);
        assert_eq!(a.authority(), "origin-a.internal:8080");
    }

    #[test]
    fn stats_track_connections_and_failures() {
        let stats = ServerStats::new();
        stats.incr_open_connections();
        stats.incr_open_connections();
        stats.decr_open_connections();
        assert_eq!(stats.open_connections(), 1);

        stats.record_connect_failure();
        stats.record_connect_failure();
        assert_eq!(stats.successive_failures(), 2);
        assert_eq!(stats.total_failures(), 2);

        stats.reset_successive_failures();
        assert_eq!(stats.successive_failures(), 0);
        assert_eq!(stats.total_failures(), 2);
    }
}
