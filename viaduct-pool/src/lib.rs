//! Outbound origin connection pool: per-origin, per-event-loop reuse of
//! persistent TCP connections (§4.1).

pub mod config;
pub mod connection;
pub mod factory;
pub mod pipeline;
pub mod pool;
pub mod socket_tuning;

pub use config::{ConnectionPoolConfig, ConnectionPoolConfigBuilder};
pub use connection::OriginConnection;
pub use factory::{ConnectionFactory, TcpConnectionFactory};
pub use pipeline::OutboundPipelineInitializer;
pub use pool::{AcquireError, PerServerConnectionPool};
