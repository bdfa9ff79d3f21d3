//! Shared error types and defaults used across the viaduct workspace.

pub mod constants;
pub mod error;

pub use constants::{
    DEFAULT_IDLE_TIMEOUT_MS, DEFAULT_MAX_CONNECTIONS_PER_HOST, DEFAULT_METRICS_PORT,
    DEFAULT_PER_SERVER_WATERLINE,
};
pub use error::{CommonError, Result};
