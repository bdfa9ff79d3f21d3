//! `OriginConnection`: a wrapper around one open outbound [`Channel`] to an
//! origin, tracking pool membership, usage count, request timing, and
//! whichever inbound request's passport is currently attached to it.

use crate::config::ConnectionPoolConfig;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use viaduct_core::channel::SharedPassport;
use viaduct_core::passport::PassportState;
use viaduct_core::Channel;

/// Where a connection currently sits. Modeled as a single tagged state
/// rather than two independent bools so "at most one of {in_pool, in_use}"
/// is structural, not merely documented (§9 design note).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    InUse,
    Idle,
    Closed,
}

/// One open channel to an origin, owned exclusively by this object until
/// [`OriginConnection::close`].
pub struct OriginConnection {
    channel: Arc<dyn Channel>,
    config: Arc<ConnectionPoolConfig>,
    state: Mutex<ConnState>,
    usage_count: AtomicU32,
    request_timer_start: Mutex<Option<Instant>>,
    attached_passport: Mutex<Option<SharedPassport>>,
}

impl OriginConnection {
    /// Wraps a freshly connected channel. Connections only come into
    /// existence already connected: the `connecting` phase precedes this
    /// type and is tracked instead via the pool's
    /// `conn_creations_in_progress` gauge, so the initial state is
    /// `InUse`, the `connecting -> connected(in_use)` edge already crossed.
    pub(crate) fn new(channel: Arc<dyn Channel>, config: Arc<ConnectionPoolConfig>) -> Self {
        Self {
            channel,
            config,
            state: Mutex::new(ConnState::InUse),
            usage_count: AtomicU32::new(0),
            request_timer_start: Mutex::new(None),
            attached_passport: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    #[must_use]
    pub fn config(&self) -> &Arc<ConnectionPoolConfig> {
        &self.config
    }

    #[must_use]
    pub fn in_pool(&self) -> bool {
        *self.state.lock() == ConnState::Idle
    }

    #[must_use]
    pub fn in_use(&self) -> bool {
        *self.state.lock() == ConnState::InUse
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.state.lock() == ConnState::Closed
    }

    #[must_use]
    pub fn usage_count(&self) -> u32 {
        self.usage_count.load(Ordering::Relaxed)
    }

    /// True iff the underlying channel reports both active and open — the
    /// contract `acquire` checks before handing out an idle connection.
    #[must_use]
    pub fn is_channel_healthy(&self) -> bool {
        self.channel.is_active() && self.channel.is_open()
    }

    #[must_use]
    pub fn request_elapsed(&self) -> Option<Duration> {
        self.request_timer_start.lock().map(|t| t.elapsed())
    }

    /// Leaves the idle deque: flips state to `InUse` without touching
    /// usage count or the request timer. Called unconditionally the moment
    /// a candidate is popped off an idle deque, before the health check,
    /// so `in_pool` is cleared whether or not the connection turns out to
    /// be reusable.
    pub(crate) fn leave_idle_state(&self) {
        *self.state.lock() = ConnState::InUse;
    }

    /// Marks this connection as sitting idle in a pool.
    pub(crate) fn mark_idle(&self) {
        *self.state.lock() = ConnState::Idle;
    }

    /// The on-acquire hook's per-connection bookkeeping: bump usage count
    /// and (re)start the request timer. Applied uniformly whether the
    /// connection was reused or just created.
    pub(crate) fn record_acquisition(&self) {
        self.usage_count.fetch_add(1, Ordering::Relaxed);
        *self.request_timer_start.lock() = Some(Instant::now());
    }

    /// Attaches the passport of the inbound request currently using this
    /// connection, so later pool activity (pool-return on release) is
    /// recorded into the same trace as the client-side events.
    pub(crate) fn attach_passport(&self, passport: SharedPassport) {
        *self.attached_passport.lock() = Some(passport);
    }

    /// Records `state` onto whichever passport is currently attached, if
    /// any. A connection that has never been acquired has nothing attached.
    pub(crate) fn record_passport(&self, state: PassportState) {
        if let Some(passport) = self.attached_passport.lock().as_ref() {
            passport.lock().record(state);
        }
    }

    /// Idempotent close: a second call is a no-op (S3).
    pub fn close(&self) {
        let mut state = self.state.lock();
        if *state == ConnState::Closed {
            return;
        }
        *state = ConnState::Closed;
        drop(state);
        self.channel.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use viaduct_core::channel::testing::FakeChannel;

    fn cfg() -> Arc<ConnectionPoolConfig> {
        ConnectionPoolConfig::builder("test-origin").build_arc()
    }

    #[test]
    fn starts_in_use_and_supports_idempotent_close() {
        let ch = FakeChannel::new();
        let conn = OriginConnection::new(ch, cfg());
        assert!(conn.in_use());
        assert!(!conn.in_pool());

        conn.close();
        assert!(conn.is_closed());
        conn.close(); // no-op
        assert!(conn.is_closed());
    }

    #[test]
    fn idle_then_reacquired_tracks_usage_count() {
        let ch = FakeChannel::new();
        let conn = OriginConnection::new(ch, cfg());
        conn.record_acquisition();
        assert_eq!(conn.usage_count(), 1);

        conn.mark_idle();
        assert!(conn.in_pool());

        conn.leave_idle_state();
        assert!(conn.in_use());
        conn.record_acquisition();
        assert_eq!(conn.usage_count(), 2);
    }

    #[test]
    fn passport_records_only_when_attached() {
        let ch = FakeChannel::new();
        let conn = OriginConnection::new(ch, cfg());
        conn.record_passport(PassportState::OriginChPoolReturned); // no-op, nothing attached

        let passport: SharedPassport = Arc::new(Mutex::new(viaduct_core::PassportTrace::new()));
        conn.attach_passport(passport.clone());
        conn.record_passport(PassportState::OriginChPoolReturned);
        assert!(passport
            .lock()
            .has_recorded(PassportState::OriginChPoolReturned));
    }
}
