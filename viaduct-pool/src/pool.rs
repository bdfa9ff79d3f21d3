//! `PerServerConnectionPool`: for one origin, a mapping from event-loop
//! identity to a LIFO queue of idle connections, with lock-free-on-the-hot-path
//! acquire/release bookkeeping (§4.1, §5).

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use viaduct_core::channel::{EventLoopId, SharedPassport};
use viaduct_core::passport::PassportState;
use viaduct_core::server::{Server, ServerStats};

use crate::config::ConnectionPoolConfig;
use crate::connection::OriginConnection;
use crate::factory::ConnectionFactory;
use crate::pipeline::OutboundPipelineInitializer;

/// Failure surfaced by [`PerServerConnectionPool::acquire`]. Carries a
/// status-code hint and fatal flag per §7's error-kind table, so the filter
/// pipeline (external, out of scope) can turn this into a client response
/// without the pool needing to know about HTTP status codes as a concept.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// Surface kind `ORIGIN_SERVER_MAX_CONNS`. The pool never attempts the
    /// connect in this case — §4.1 step 2 fails fast before dispatching.
    #[error("max connections per host exceeded for origin {origin}")]
    MaxConnectionsPerHostExceeded { origin: String },

    /// Wraps the underlying connect failure. A retry candidate from the
    /// caller's perspective; the pool itself never retries (§4.1 Failure
    /// semantics).
    #[error("failed to connect to origin {origin}: {source}")]
    ConnectError {
        origin: String,
        #[source]
        source: std::io::Error,
    },
}

impl AcquireError {
    /// Status code a filter pipeline would typically map this to, per §7.
    #[must_use]
    pub fn status_hint(&self) -> Option<u16> {
        match self {
            Self::MaxConnectionsPerHostExceeded { .. } => Some(503),
            Self::ConnectError { .. } => None,
        }
    }

    /// Neither kind is fatal to the *inbound* channel — both are origin-side
    /// failures the filter pipeline can still answer on the still-healthy
    /// client connection.
    #[must_use]
    pub fn fatal(&self) -> bool {
        false
    }
}

type IdleDeque = Arc<Mutex<VecDeque<Arc<OriginConnection>>>>;

/// For one origin, owns a per-event-loop idle-connection pool plus the
/// metric counters and gauges described in §3.
pub struct PerServerConnectionPool {
    server: Server,
    stats: Arc<ServerStats>,
    config: Arc<ConnectionPoolConfig>,
    factory: Arc<dyn ConnectionFactory>,
    pipeline: OutboundPipelineInitializer,
    per_loop_idle: DashMap<EventLoopId, IdleDeque>,

    conns_in_pool: AtomicI64,
    conns_in_use: AtomicI64,
    conn_creations_in_progress: AtomicI64,

    request_conn: AtomicI64,
    reuse_conn: AtomicI64,
    create_new_conn: AtomicI64,
    create_conn_succeeded: AtomicI64,
    create_conn_failed: AtomicI64,
    conn_taken_from_pool_not_open: AtomicI64,
    max_conns_per_host_exceeded: AtomicI64,
}

impl PerServerConnectionPool {
    #[must_use]
    pub fn new(
        server: Server,
        config: Arc<ConnectionPoolConfig>,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Self {
        Self {
            server,
            stats: Arc::new(ServerStats::new()),
            config,
            factory,
            pipeline: OutboundPipelineInitializer::default_chain(),
            per_loop_idle: DashMap::new(),
            conns_in_pool: AtomicI64::new(0),
            conns_in_use: AtomicI64::new(0),
            conn_creations_in_progress: AtomicI64::new(0),
            request_conn: AtomicI64::new(0),
            reuse_conn: AtomicI64::new(0),
            create_new_conn: AtomicI64::new(0),
            create_conn_succeeded: AtomicI64::new(0),
            create_conn_failed: AtomicI64::new(0),
            conn_taken_from_pool_not_open: AtomicI64::new(0),
            max_conns_per_host_exceeded: AtomicI64::new(0),
        }
    }

    #[must_use]
    pub fn server(&self) -> &Server {
        &self.server
    }

    #[must_use]
    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.stats
    }

    #[must_use]
    pub fn conns_in_pool(&self) -> i64 {
        self.conns_in_pool.load(Ordering::Relaxed)
    }
    #[must_use]
    pub fn conns_in_use(&self) -> i64 {
        self.conns_in_use.load(Ordering::Relaxed)
    }
    #[must_use]
    pub fn conn_creations_in_progress(&self) -> i64 {
        self.conn_creations_in_progress.load(Ordering::Relaxed)
    }
    #[must_use]
    pub fn reuse_conn_count(&self) -> i64 {
        self.reuse_conn.load(Ordering::Relaxed)
    }
    #[must_use]
    pub fn create_new_conn_count(&self) -> i64 {
        self.create_new_conn.load(Ordering::Relaxed)
    }
    #[must_use]
    pub fn conn_taken_from_pool_not_open_count(&self) -> i64 {
        self.conn_taken_from_pool_not_open.load(Ordering::Relaxed)
    }
    #[must_use]
    pub fn max_conns_per_host_exceeded_count(&self) -> i64 {
        self.max_conns_per_host_exceeded.load(Ordering::Relaxed)
    }

    fn deque_for(&self, loop_id: EventLoopId) -> IdleDeque {
        // Miss path constructs a fresh empty deque and publishes it via
        // entry/or_insert_with — a lock-free put-if-absent. Under race two
        // threads may each build an empty deque; the loser's is discarded.
        // This is the documented, intentional tradeoff (§5, §9): avoiding a
        // lock here matters more than avoiding a wasted allocation.
        self.per_loop_idle
            .entry(loop_id)
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new())))
            .clone()
    }

    /// §4.1 `acquire`. `http_method`/`uri`/`attempt` carry no algorithmic
    /// weight of their own (retries live entirely in the external filter
    /// pipeline), but every log line and span emitted for the duration of
    /// this call inherits them, so a trace can tell which inbound request,
    /// and which attempt at it, a given origin connect or pool hit belongs
    /// to.
    #[instrument(
        skip(self, passport),
        fields(origin = %self.server, http_method = %http_method, uri = %uri, attempt)
    )]
    pub async fn acquire(
        &self,
        event_loop: EventLoopId,
        http_method: &str,
        uri: &str,
        attempt: u32,
        passport: SharedPassport,
    ) -> Result<Arc<OriginConnection>, AcquireError> {
        self.request_conn.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        {
            viaduct_observability::pool_metrics().incr_request_conn(&self.server.authority());
        }

        let deque = self.deque_for(event_loop);
        loop {
            let candidate = {
                let mut guard = deque.lock();
                guard.pop_front()
            };
            let Some(conn) = candidate else {
                break;
            };

            conn.leave_idle_state();
            self.conns_in_pool.fetch_sub(1, Ordering::Relaxed);

            if conn.is_channel_healthy() {
                self.reuse_conn.fetch_add(1, Ordering::Relaxed);
                self.conns_in_use.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "metrics")]
                {
                    let m = viaduct_observability::pool_metrics();
                    m.incr_reuse_conn(&self.server.authority());
                    m.set_conns_in_use(&self.server.authority(), self.conns_in_use());
                    m.set_conns_in_pool(&self.server.authority(), self.conns_in_pool());
                }
                self.on_acquire_hook(&conn, passport);
                return Ok(conn);
            }

            debug!(origin = %self.server, "idle connection found dead, discarding");
            self.conn_taken_from_pool_not_open
                .fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "metrics")]
            {
                viaduct_observability::pool_metrics()
                    .incr_conn_taken_from_pool_not_open(&self.server.authority());
            }
            conn.close();
            self.stats.decr_open_connections();
        }

        self.try_make_new_connection(passport).await
    }

    /// §4.1 `try_make_new_connection`.
    async fn try_make_new_connection(
        &self,
        passport: SharedPassport,
    ) -> Result<Arc<OriginConnection>, AcquireError> {
        let open_and_opening = self.stats.open_connections() as i64
            + self.conn_creations_in_progress.load(Ordering::Relaxed);

        if self.config.max_connections_per_host >= 0
            && open_and_opening >= self.config.max_connections_per_host
        {
            self.max_conns_per_host_exceeded
                .fetch_add(1, Ordering::Relaxed);
            warn!(origin = %self.server, "max connections per host exceeded");
            #[cfg(feature = "metrics")]
            {
                viaduct_observability::pool_metrics()
                    .incr_max_conns_per_host_exceeded(&self.server.authority());
            }
            return Err(AcquireError::MaxConnectionsPerHostExceeded {
                origin: self.server.authority(),
            });
        }

        self.create_new_conn.fetch_add(1, Ordering::Relaxed);
        self.conn_creations_in_progress
            .fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        {
            let m = viaduct_observability::pool_metrics();
            m.incr_create_new_conn(&self.server.authority());
            m.set_conn_creations_in_progress(&self.server.authority(), self.conn_creations_in_progress());
        }
        passport.lock().record(PassportState::OriginChConnecting);

        let result = self.factory.connect(&self.server).await;
        self.handle_connect_completion(result, passport)
    }

    /// §4.1 `handle_connect_completion`.
    fn handle_connect_completion(
        &self,
        result: std::io::Result<Arc<dyn viaduct_core::Channel>>,
        passport: SharedPassport,
    ) -> Result<Arc<OriginConnection>, AcquireError> {
        self.conn_creations_in_progress
            .fetch_sub(1, Ordering::Relaxed);

        match result {
            Ok(channel) => {
                passport.lock().record(PassportState::OriginChConnected);
                // Counters are bumped before the on-acquire hook runs, even
                // though the hook could in principle fail. Ordering decided
                // in favor of observability over pristine accounting; see
                // DESIGN.md.
                self.stats.incr_open_connections();
                self.stats.reset_successive_failures();
                self.create_conn_succeeded.fetch_add(1, Ordering::Relaxed);
                self.conns_in_use.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "metrics")]
                {
                    let m = viaduct_observability::pool_metrics();
                    m.incr_create_conn_succeeded(&self.server.authority());
                    m.set_conns_in_use(&self.server.authority(), self.conns_in_use());
                    m.set_conn_creations_in_progress(&self.server.authority(), self.conn_creations_in_progress());
                }

                let conn = Arc::new(OriginConnection::new(channel, self.config.clone()));
                self.on_acquire_hook(&conn, passport);
                Ok(conn)
            }
            Err(source) => {
                self.stats.record_connect_failure();
                self.create_conn_failed.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "metrics")]
                {
                    let m = viaduct_observability::pool_metrics();
                    m.incr_create_conn_failed(&self.server.authority());
                    m.set_conn_creations_in_progress(&self.server.authority(), self.conn_creations_in_progress());
                }
                Err(AcquireError::ConnectError {
                    origin: self.server.authority(),
                    source,
                })
            }
        }
    }

    /// The on-acquire hook (§4.1): reinstall the idle timer via the
    /// pipeline, attach the passport, start the request timer, initiate a
    /// read, bump `active_requests` and the connection's usage count.
    fn on_acquire_hook(&self, conn: &Arc<OriginConnection>, passport: SharedPassport) {
        self.pipeline.on_acquire(conn);
        conn.attach_passport(passport);
        conn.channel().read();
        self.stats.incr_active_requests();
    }

    /// §4.1 `release`.
    pub fn release(&self, conn: &Arc<OriginConnection>) -> bool {
        if conn.in_pool() || conn.is_closed() {
            return false;
        }

        // Whatever happens next, this connection is leaving `in_use` — it
        // either lands in a deque as idle or gets discarded. Both outcomes
        // free up the "in use" slot, so this decrement is unconditional.
        self.conns_in_use.fetch_sub(1, Ordering::Relaxed);
        self.stats.decr_active_requests();

        let deque = self.deque_for(conn.channel().event_loop());

        if self.config.per_server_waterline >= 0 {
            let len = deque.lock().len() as i64;
            if len >= self.config.per_server_waterline {
                debug!(origin = %self.server, "idle waterline reached, discarding connection");
                conn.close();
                self.stats.decr_open_connections();
                #[cfg(feature = "metrics")]
                {
                    viaduct_observability::pool_metrics()
                        .set_conns_in_use(&self.server.authority(), self.conns_in_use());
                }
                return false;
            }
        }

        deque.lock().push_front(conn.clone());
        conn.mark_idle();
        self.conns_in_pool.fetch_add(1, Ordering::Relaxed);
        conn.record_passport(PassportState::OriginChPoolReturned);
        #[cfg(feature = "metrics")]
        {
            let m = viaduct_observability::pool_metrics();
            m.set_conns_in_pool(&self.server.authority(), self.conns_in_pool());
            m.set_conns_in_use(&self.server.authority(), self.conns_in_use());
        }
        true
    }

    /// §4.1 `remove`: search every event loop's deque, since a connection
    /// may be removed from a different loop than the one that released it.
    /// Per the state machine (§4.1, "a connection may transition `in_use →
    /// closed` on error or explicit `remove`"), a removed connection is
    /// closed, not left dangling in an `idle` state it no longer occupies.
    pub fn remove(&self, conn: &Arc<OriginConnection>) -> bool {
        for entry in &self.per_loop_idle {
            let mut guard = entry.value().lock();
            if let Some(pos) = guard.iter().position(|c| Arc::ptr_eq(c, conn)) {
                guard.remove(pos);
                drop(guard);
                self.conns_in_pool.fetch_sub(1, Ordering::Relaxed);
                conn.close();
                self.stats.decr_open_connections();
                return true;
            }
        }
        false
    }

    /// §4.1 `shutdown`: idempotent — after the first call every deque is
    /// empty, so a repeat call closes nothing.
    #[instrument(skip(self), fields(origin = %self.server))]
    pub fn shutdown(&self) {
        for entry in &self.per_loop_idle {
            let mut guard = entry.value().lock();
            for conn in guard.drain(..) {
                conn.close();
                self.stats.decr_open_connections();
            }
        }
        self.conns_in_pool.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex as StdMutex;
    use viaduct_core::channel::testing::FakeChannel;
    use viaduct_core::Channel;

    struct FixedFactory {
        channels: StdMutex<VecDeque<Arc<dyn Channel>>>,
        fail_next: AtomicBool,
    }

    impl FixedFactory {
        fn new() -> Self {
            Self {
                channels: StdMutex::new(VecDeque::new()),
                fail_next: AtomicBool::new(false),
            }
        }

        fn push(&self, channel: Arc<dyn Channel>) {
            self.channels.lock().unwrap().push_back(channel);
        }
    }

    #[async_trait]
    impl ConnectionFactory for FixedFactory {
        async fn connect(&self, _server: &Server) -> std::io::Result<Arc<dyn Channel>> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(std::io::Error::other("boom"));
            }
            self.channels
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| std::io::Error::other("no channel queued"))
        }
    }

    fn cfg(max_conns: i64, waterline: i64) -> Arc<ConnectionPoolConfig> {
        ConnectionPoolConfig::builder("test-origin")
            .max_connections_per_host(max_conns)
            .per_server_waterline(waterline)
            .build_arc()
    }

    fn passport() -> SharedPassport {
        Arc::new(std::sync::Mutex::new(viaduct_core::PassportTrace::new()))
    }

    // S1 — idle reuse.
    #[tokio::test]
    async fn s1_idle_reuse_on_same_event_loop() {
        let factory = Arc::new(FixedFactory::new());
        let ch = FakeChannel::new();
        factory.push(ch.clone());
        let pool = PerServerConnectionPool::new(
            Server::plain("origin", 80),
            cfg(10, 5),
            factory,
        );

        let loop_id = EventLoopId::current();
        let conn = pool.acquire(loop_id, "GET", "/", 1, passport()).await.unwrap();
        assert_eq!(pool.create_new_conn_count(), 1);
        assert!(pool.release(&conn));

        let conn2 = pool.acquire(loop_id, "GET", "/", 1, passport()).await.unwrap();
        assert_eq!(pool.reuse_conn_count(), 1);
        assert_eq!(pool.create_new_conn_count(), 1);
        assert!(Arc::ptr_eq(conn.channel(), conn2.channel()));
    }

    // S2 — max connections ceiling.
    #[tokio::test]
    async fn s2_max_connections_ceiling() {
        let factory = Arc::new(FixedFactory::new());
        factory.push(FakeChannel::new());
        factory.push(FakeChannel::new());
        let pool = PerServerConnectionPool::new(Server::plain("origin", 80), cfg(2, 5), factory);
        let loop_id = EventLoopId::current();

        let _c1 = pool.acquire(loop_id, "GET", "/", 1, passport()).await.unwrap();
        let _c2 = pool.acquire(loop_id, "GET", "/", 1, passport()).await.unwrap();
        assert_eq!(pool.stats().open_connections(), 2);

        let before = pool.conn_creations_in_progress();
        let err = pool.acquire(loop_id, "GET", "/", 1, passport()).await.unwrap_err();
        assert!(matches!(err, AcquireError::MaxConnectionsPerHostExceeded { .. }));
        assert_eq!(pool.max_conns_per_host_exceeded_count(), 1);
        assert_eq!(pool.conn_creations_in_progress(), before);
    }

    // S3 — dead idle connection is skipped and a fresh connect is made.
    #[tokio::test]
    async fn s3_dead_idle_connection_is_skipped() {
        let factory = Arc::new(FixedFactory::new());
        let dead = FakeChannel::new();
        let fresh = FakeChannel::new();
        factory.push(dead.clone());
        factory.push(fresh);
        let pool = PerServerConnectionPool::new(Server::plain("origin", 80), cfg(10, 5), factory);
        let loop_id = EventLoopId::current();

        let conn = pool.acquire(loop_id, "GET", "/", 1, passport()).await.unwrap();
        assert!(pool.release(&conn));
        dead.close(); // external close while idle in the pool

        let conn2 = pool.acquire(loop_id, "GET", "/", 1, passport()).await.unwrap();
        assert_eq!(pool.conn_taken_from_pool_not_open_count(), 1);
        assert_eq!(pool.create_new_conn_count(), 2);
        assert!(conn.is_closed());
        conn.close(); // idempotent, no-op
        assert!(conn.is_closed());
        drop(conn2);
    }

    // S4 — waterline discard.
    #[tokio::test]
    async fn s4_waterline_discard() {
        let factory = Arc::new(FixedFactory::new());
        factory.push(FakeChannel::new());
        factory.push(FakeChannel::new());
        let pool = PerServerConnectionPool::new(Server::plain("origin", 80), cfg(10, 1), factory);
        let loop_id = EventLoopId::current();

        let c1 = pool.acquire(loop_id, "GET", "/", 1, passport()).await.unwrap();
        let c2 = pool.acquire(loop_id, "GET", "/", 1, passport()).await.unwrap();

        assert!(pool.release(&c1));
        assert_eq!(pool.conns_in_pool(), 1);

        // Second release observes the deque already at the waterline.
        assert!(!pool.release(&c2));
        assert!(c2.is_closed());
        assert_eq!(pool.conns_in_pool(), 1);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_closes_idle_connections() {
        let factory = Arc::new(FixedFactory::new());
        factory.push(FakeChannel::new());
        let pool = PerServerConnectionPool::new(Server::plain("origin", 80), cfg(10, 5), factory);
        let loop_id = EventLoopId::current();

        let conn = pool.acquire(loop_id, "GET", "/", 1, passport()).await.unwrap();
        pool.release(&conn);
        pool.shutdown();
        assert!(conn.is_closed());
        assert_eq!(pool.conns_in_pool(), 0);

        pool.shutdown(); // no-op
        assert_eq!(pool.conns_in_pool(), 0);
    }

    #[tokio::test]
    async fn connect_failure_updates_stats_exactly_once() {
        let factory = Arc::new(FixedFactory::new());
        factory.fail_next.store(true, Ordering::SeqCst);
        let pool = PerServerConnectionPool::new(Server::plain("origin", 80), cfg(10, 5), factory);

        let err = pool.acquire(EventLoopId::current(), "GET", "/", 1, passport()).await.unwrap_err();
        assert!(matches!(err, AcquireError::ConnectError { .. }));
        assert_eq!(pool.stats().total_failures(), 1);
        assert_eq!(pool.stats().successive_failures(), 1);
        assert_eq!(pool.conn_creations_in_progress(), 0);
    }

    #[tokio::test]
    async fn successive_failures_reset_on_next_successful_connect() {
        let factory = Arc::new(FixedFactory::new());
        factory.fail_next.store(true, Ordering::SeqCst);
        factory.push(FakeChannel::new());
        let pool = PerServerConnectionPool::new(Server::plain("origin", 80), cfg(10, 5), factory);

        let err = pool.acquire(EventLoopId::current(), "GET", "/", 1, passport()).await.unwrap_err();
        assert!(matches!(err, AcquireError::ConnectError { .. }));
        assert_eq!(pool.stats().successive_failures(), 1);

        let _conn = pool.acquire(EventLoopId::current(), "GET", "/", 1, passport()).await.unwrap();
        assert_eq!(pool.stats().successive_failures(), 0);
        assert_eq!(pool.stats().total_failures(), 1);
    }

    #[tokio::test]
    async fn remove_finds_connection_across_loops() {
        let factory = Arc::new(FixedFactory::new());
        factory.push(FakeChannel::new());
        let pool = PerServerConnectionPool::new(Server::plain("origin", 80), cfg(10, 5), factory);
        let conn = pool.acquire(EventLoopId::current(), "GET", "/", 1, passport()).await.unwrap();
        pool.release(&conn);
        assert!(pool.remove(&conn));
        assert!(!pool.remove(&conn)); // already gone
        assert_eq!(pool.conns_in_pool(), 0);
    }
}
