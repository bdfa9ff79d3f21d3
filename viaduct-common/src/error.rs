//! Shared, low-level error type used where a crate needs a generic error
//! rather than its own domain-specific enum (e.g. config parsing helpers).
//!
//! The domain error kinds from the gateway's error table: `DecodeError`,
//! `MaxConnectionsPerHost`, `ConnectError`, `ReadTimeout`, `WriteError`,
//! `InternalError` — are realized as their own `thiserror` enums closer to
//! where they are raised (`viaduct_pool::pool::AcquireError`,
//! `viaduct_http::error::GatewayError`), not folded into this one.

use thiserror::Error;

/// Generic error for shared, non-domain-specific failures.
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result alias for [`CommonError`].
pub type Result<T> = std::result::Result<T, CommonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_message_roundtrips() {
        let err = CommonError::Config("idle_timeout_ms must be > 0".to_string());
        assert!(err.to_string().contains("idle_timeout_ms"));
    }

    #[test]
    fn io_error_converts_via_from() {
        let io_err = std::io::Error::other("boom");
        let err: CommonError = io_err.into();
        assert!(matches!(err, CommonError::Io(_)));
    }
}
