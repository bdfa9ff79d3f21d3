#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Cross-crate integration tests for the edge proxy core.
//!
//! Each per-crate unit test suite (`viaduct-pool`, `viaduct-http`) exercises
//! its own subsystem in isolation against a fake `Channel`. These tests
//! instead drive the inbound lifecycle handlers and the outbound pool
//! together in one scenario, the way the real data flow in spec §2 connects
//! them: client bytes -> `ClientRequestReceiver` -> (filter pipeline) ->
//! `PerServerConnectionPool::acquire` -> origin exchange -> release ->
//! `ClientResponseWriter` -> client bytes.

mod cancellation;
mod request_response_roundtrip;

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use viaduct_core::channel::testing::FakeChannel;
use viaduct_core::channel::{EventLoopId, SharedPassport};
use viaduct_core::server::Server;
use viaduct_core::Channel;
use viaduct_pool::config::ConnectionPoolConfig;
use viaduct_pool::factory::ConnectionFactory;
use viaduct_pool::pool::PerServerConnectionPool;

/// A [`ConnectionFactory`] that hands out pre-built fake origin channels in
/// FIFO order, so a test can control exactly which `Channel` the pool wraps.
pub struct FakeOriginFactory {
    channels: StdMutex<VecDeque<Arc<dyn Channel>>>,
}

impl FakeOriginFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            channels: StdMutex::new(VecDeque::new()),
        })
    }

    pub fn push(&self, channel: Arc<dyn Channel>) {
        self.channels.lock().expect("factory mutex poisoned").push_back(channel);
    }
}

#[async_trait]
impl ConnectionFactory for FakeOriginFactory {
    async fn connect(&self, _server: &Server) -> std::io::Result<Arc<dyn Channel>> {
        self.channels
            .lock()
            .expect("factory mutex poisoned")
            .pop_front()
            .ok_or_else(|| std::io::Error::other("no fake origin channel queued"))
    }
}

/// A one-origin pool backed by [`FakeOriginFactory`], with the waterline and
/// max-connections knobs wide open so tests only exercise the behavior under
/// test, not an incidental ceiling.
pub fn make_pool(factory: Arc<FakeOriginFactory>) -> PerServerConnectionPool {
    let config = ConnectionPoolConfig::builder("origin.test.internal")
        .max_connections_per_host(10)
        .per_server_waterline(10)
        .build_arc();
    PerServerConnectionPool::new(Server::plain("origin.test.internal", 80), config, factory)
}

pub fn fresh_passport() -> SharedPassport {
    Arc::new(std::sync::Mutex::new(viaduct_core::PassportTrace::new()))
}

pub fn current_loop() -> EventLoopId {
    EventLoopId::current()
}

pub fn fake_client_channel() -> Arc<FakeChannel> {
    FakeChannel::new()
}
