//! Inbound-side error kinds (§7). Each carries a status-code hint and a
//! fatal flag, matching the outbound side's `AcquireError` in
//! `viaduct_pool::pool`.

use thiserror::Error;

/// Errors the inbound lifecycle handlers can raise.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Raised by the (external) codec; surfaced here because the receiver
    /// is the one that turns a decode failure into a client-visible 400.
    #[error("failed to decode request: {0}")]
    Decode(String),

    /// Raised by the (external) idle handler on a read timeout while a
    /// response is being prepared.
    #[error("read timeout")]
    ReadTimeout,

    /// Raised by the response writer when a write to the client fails.
    #[error("write failed during {stage}")]
    Write { stage: WriteStage },

    /// Anything else unexpected.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Which stage of writing a response failed, so the caller can log and
/// react without the writer needing to know about HTTP status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    ResponseHeaders,
    ResponseContent,
}

impl std::fmt::Display for WriteStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ResponseHeaders => write!(f, "response_headers"),
            Self::ResponseContent => write!(f, "response_content"),
        }
    }
}

impl GatewayError {
    /// Status code hint per §7's error-kind table.
    #[must_use]
    pub fn status_hint(&self) -> Option<u16> {
        match self {
            Self::Decode(_) => Some(400),
            Self::ReadTimeout => Some(504),
            Self::Write { .. } => None,
            Self::Internal(_) => Some(500),
        }
    }

    /// Fatal errors close the channel after the current write (§7
    /// Propagation). Decode and internal errors are fatal to the channel;
    /// a write failure and a read timeout are handled by the writer's own
    /// `exceptionCaught` path and are not inherently fatal here.
    #[must_use]
    pub fn fatal(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::Internal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_hints_match_the_error_table() {
        assert_eq!(GatewayError::Decode("bad".into()).status_hint(), Some(400));
        assert_eq!(GatewayError::ReadTimeout.status_hint(), Some(504));
        assert_eq!(GatewayError::Internal("oops".into()).status_hint(), Some(500));
    }

    #[test]
    fn decode_and_internal_errors_are_fatal() {
        assert!(GatewayError::Decode("bad".into()).fatal());
        assert!(GatewayError::Internal("oops".into()).fatal());
        assert!(!GatewayError::ReadTimeout.fatal());
    }
}
