//! Creates fresh outbound channels to an origin.
//!
//! The real socket event loop and HTTP codec are external collaborators
//! (§1); this factory's job ends at "a connected, healthy `Channel`" — what
//! rides over it is wired by whatever supplies the `Channel` impl in
//! production (a `hyper`/tokio client connection).

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use viaduct_core::channel::{ChannelAttributes, EventLoopId, OutboundFrame, SharedPassport};
use viaduct_core::passport::PassportTrace;
use viaduct_core::server::Server;
use viaduct_core::Channel;

use crate::socket_tuning;

/// Dials a fresh channel to `server`. Implementations must not block the
/// calling event loop thread (§5 suspension points) — the trait is async so
/// the only blocking point is the `.await` on `connect`.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self, server: &Server) -> std::io::Result<Arc<dyn Channel>>;
}

/// Production factory: dials a real TCP connection and applies the usual
/// socket tuning (`TCP_NODELAY`, buffer sizes, keepalive) for client
/// connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnectionFactory;

#[async_trait]
impl ConnectionFactory for TcpConnectionFactory {
    async fn connect(&self, server: &Server) -> std::io::Result<Arc<dyn Channel>> {
        let stream = TcpStream::connect(server.authority()).await?;
        socket_tuning::configure_socket_silent(&stream);
        let peer = stream.peer_addr().ok();
        Ok(Arc::new(TcpChannel::new(stream, peer)))
    }
}

/// A [`Channel`] backed by a real TCP stream to an origin.
///
/// Framing and request/response bytes are the HTTP codec's job (out of
/// scope, §1); this type only tracks liveness, owns the socket until
/// closed, and carries the attribute/passport side tables every `Channel`
/// needs.
pub struct TcpChannel {
    _stream: TcpStream,
    peer: Option<SocketAddr>,
    active: AtomicBool,
    open: AtomicBool,
    attrs: ChannelAttributes,
    passport: SharedPassport,
    loop_id: EventLoopId,
}

impl TcpChannel {
    #[must_use]
    pub fn new(stream: TcpStream, peer: Option<SocketAddr>) -> Self {
        Self {
            _stream: stream,
            peer,
            active: AtomicBool::new(true),
            open: AtomicBool::new(true),
            attrs: ChannelAttributes::new(),
            passport: Arc::new(std::sync::Mutex::new(PassportTrace::new())),
            loop_id: EventLoopId::current(),
        }
    }

    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

impl Channel for TcpChannel {
    fn event_loop(&self) -> EventLoopId {
        self.loop_id
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn write(&self, _frame: OutboundFrame) {
        // Writing origin-bound request bytes is the HTTP codec's job; this
        // core only manages the channel's lifecycle and pool membership.
    }

    fn close(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
    }

    fn read(&self) {}

    fn attrs(&self) -> &ChannelAttributes {
        &self.attrs
    }

    fn passport(&self) -> &SharedPassport {
        &self.passport
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_to_closed_port_fails_fast() {
        // Port 0 triggers an OS-level assignment; connecting to an address
        // nothing listens on should fail without hanging the test.
        let factory = TcpConnectionFactory;
        let bogus = Server::plain("127.0.0.1", 1);
        let result = tokio::time::timeout(Duration::from_secs(5), factory.connect(&bogus)).await;
        assert!(result.is_ok(), "connect should not hang");
    }
}
