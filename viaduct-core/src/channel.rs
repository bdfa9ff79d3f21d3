//! The boundary between this core and the external socket engine / HTTP
//! codec: a minimal per-connection `Channel` abstraction plus a typed
//! attribute side-table, both scoped to exactly what the lifecycle
//! handlers and the connection pool need.
//!
//! Production wiring implements [`Channel`] over a real transport (a
//! `hyper`/tokio connection); tests implement it over an in-memory fake.
//! This keeps the raw socket event loop and HTTP codec out of this crate,
//! as required — they are external collaborators, not reimplemented here.

use crate::passport::PassportTrace;
use bytes::Bytes;
use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

/// Identity of the event loop currently driving a channel's callbacks.
///
/// Netty pins one channel to one single-threaded reactor for its whole
/// lifetime; Tokio's multi-thread runtime work-steals instead. This type
/// approximates event-loop affinity with the OS thread id of whichever
/// worker is driving the channel's task at the moment it is read — exact
/// in the common case, and never a correctness hazard even when it isn't
/// (see `DESIGN.md`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventLoopId(std::thread::ThreadId);

impl EventLoopId {
    /// The event loop identity of whichever thread calls this.
    #[must_use]
    pub fn current() -> Self {
        Self(std::thread::current().id())
    }
}

/// A typed key into a [`ChannelAttributes`] side table. Two `AttrId`s with
/// the same name but different `T` are distinct keys — this is what
/// distinguishes this from a stringly-typed `HashMap<String, Box<dyn Any>>`
/// used without discipline.
pub struct AttrId<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AttrId<T> {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for AttrId<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for AttrId<T> {}

/// Typed per-connection side table, keyed by [`AttrId<T>`] rather than a
/// reflective string map. Each distinct `T` gets its own storage slot even
/// if two `AttrId`s happen to share a name (they won't, in practice, since
/// all well-known keys below are unique).
#[derive(Default)]
pub struct ChannelAttributes {
    values: Mutex<HashMap<&'static str, Arc<dyn Any + Send + Sync>>>,
}

impl std::fmt::Debug for ChannelAttributes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<_> = self
            .values
            .lock()
            .map(|g| g.keys().copied().collect())
            .unwrap_or_default();
        f.debug_struct("ChannelAttributes").field("keys", &keys).finish()
    }
}

impl ChannelAttributes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: Any + Send + Sync>(&self, id: AttrId<T>, value: T) {
        if let Ok(mut map) = self.values.lock() {
            map.insert(id.name(), Arc::new(value));
        }
    }

    #[must_use]
    pub fn get<T: Any + Send + Sync + Clone>(&self, id: AttrId<T>) -> Option<T> {
        self.values
            .lock()
            .ok()?
            .get(id.name())
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    pub fn remove<T: Any + Send + Sync>(&self, id: AttrId<T>) {
        if let Ok(mut map) = self.values.lock() {
            map.remove(id.name());
        }
    }
}

/// Well-known channel attribute keys used by this core. Names are chosen
/// to be self-describing rather than mirror any particular framework's
/// internal constant names.
pub mod attrs {
    use super::AttrId;
    use std::net::SocketAddr;

    /// Source (peer) address of the inbound connection.
    pub const SOURCE_ADDRESS: AttrId<SocketAddr> = AttrId::new("source_address");
    /// Local port the inbound connection was accepted on.
    pub const LOCAL_PORT: AttrId<u16> = AttrId::new("local_port");
    /// Local address the inbound connection was accepted on.
    pub const LOCAL_ADDRESS: AttrId<SocketAddr> = AttrId::new("local_address");
    /// ALPN-negotiated protocol name, when known ahead of the wire version text.
    pub const PROTOCOL_NAME: AttrId<String> = AttrId::new("protocol_name");
    /// SSL handshake info, present only on TLS-terminated connections.
    pub const SSL_INFO: AttrId<String> = AttrId::new("ssl_info");
}

// `ZUUL_REQ`/`ZUUL_RESP` (§6) are declared in `viaduct_http`, not here: this
// crate (`viaduct-core`) sits below `viaduct-http` in the dependency graph
// and cannot name `RequestMessage`/`ResponseMessage` as an `AttrId<T>`'s
// type parameter without creating a cycle. `AttrId::new` is a `const fn`
// usable from any crate, so the well-known key still lives next to the
// type it stores.

/// A passport shared between the channel that owns it and whatever
/// temporarily borrows it across an async boundary (the pool's `acquire`
/// threads the inbound request's passport through to the origin side so
/// `ORIGIN_CH_CONNECTING`/`ORIGIN_CH_CONNECTED`/`ORIGIN_CH_POOL_RETURNED`
/// land in the same trace as the client-side events).
pub type SharedPassport = Arc<Mutex<PassportTrace>>;

/// An outbound frame the [`Channel`] can be asked to write.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    ResponseHead { status: u16 },
    Content { data: Bytes, last: bool },
}

/// The minimal surface the lifecycle handlers and the connection pool need
/// from whatever is actually driving I/O for a connection.
pub trait Channel: Send + Sync {
    /// The event loop currently driving this channel.
    fn event_loop(&self) -> EventLoopId;

    /// True once connected and not yet closed.
    fn is_active(&self) -> bool;

    /// True until [`Channel::close`] has completed; distinct from
    /// `is_active` in that a channel mid-close may be neither.
    fn is_open(&self) -> bool;

    /// Request a write of `frame`. Fire-and-forget; failures surface via
    /// the handler's own write-failure path, not a returned `Result`,
    /// matching a completion-callback write model.
    fn write(&self, frame: OutboundFrame);

    /// Idempotent close.
    fn close(&self);

    /// Request the engine deliver the next inbound frame (used to resume
    /// reading after a response completes on a keep-alive connection).
    fn read(&self);

    fn attrs(&self) -> &ChannelAttributes;

    fn passport(&self) -> &SharedPassport;
}

/// Test doubles for [`Channel`], exposed (not `#[cfg(test)]`-gated) so the
/// pool and HTTP crates can exercise their own logic against an in-memory
/// fake without a dev-dependency cycle back on this crate's test harness.
pub mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// An in-memory fake channel used throughout this workspace's tests so
    /// the lifecycle handlers and pool can be exercised without sockets.
    pub struct FakeChannel {
        pub active: AtomicBool,
        pub open: AtomicBool,
        pub writes: Mutex<Vec<OutboundFrame>>,
        pub read_requests: Mutex<u32>,
        attrs: ChannelAttributes,
        passport: SharedPassport,
        loop_id: EventLoopId,
    }

    impl FakeChannel {
        pub fn new() -> Arc<Self> {
            Self::on_loop(EventLoopId::current())
        }

        pub fn on_loop(loop_id: EventLoopId) -> Arc<Self> {
            Arc::new(Self {
                active: AtomicBool::new(true),
                open: AtomicBool::new(true),
                writes: Mutex::new(Vec::new()),
                read_requests: Mutex::new(0),
                attrs: ChannelAttributes::new(),
                passport: Arc::new(Mutex::new(PassportTrace::new())),
                loop_id,
            })
        }
    }

    impl Channel for FakeChannel {
        fn event_loop(&self) -> EventLoopId {
            self.loop_id
        }

        fn is_active(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        fn write(&self, frame: OutboundFrame) {
            if let Ok(mut w) = self.writes.lock() {
                w.push(frame);
            }
        }

        fn close(&self) {
            self.active.store(false, Ordering::SeqCst);
            self.open.store(false, Ordering::SeqCst);
        }

        fn read(&self) {
            if let Ok(mut r) = self.read_requests.lock() {
                *r += 1;
            }
        }

        fn attrs(&self) -> &ChannelAttributes {
            &self.attrs
        }

        fn passport(&self) -> &SharedPassport {
            &self.passport
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    #[test]
    fn attrs_roundtrip_typed_values() {
        let attrs = ChannelAttributes::new();
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        attrs.set(self::attrs::SOURCE_ADDRESS, addr);
        assert_eq!(attrs.get(self::attrs::SOURCE_ADDRESS), Some(addr));

        attrs.remove(self::attrs::SOURCE_ADDRESS);
        assert_eq!(attrs.get(self::attrs::SOURCE_ADDRESS), None);
    }

    #[test]
    fn event_loop_id_is_stable_within_a_thread() {
        let a = EventLoopId::current();
        let b = EventLoopId::current();
        assert_eq!(a, b);
    }
}
