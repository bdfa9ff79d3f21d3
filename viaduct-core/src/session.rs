//! Per-request session context and lifecycle completion reasons.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Reason a request/response cycle ended. Fired alongside a `Complete`
/// lifecycle event by the (external) filter pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteReason {
    /// The normal path: response fully written, request fully consumed.
    SessionComplete,
    /// The channel went inactive (peer closed, socket error) mid-cycle.
    Inactive,
    /// The idle handler fired a timeout for this channel.
    Idle,
    /// The filter pipeline rejected the request before completion.
    PipelineReject,
    /// The channel was explicitly disconnected.
    Disconnect,
}

impl CompleteReason {
    #[must_use]
    pub fn is_session_complete(self) -> bool {
        matches!(self, Self::SessionComplete)
    }
}

/// Opaque, per-request map keyed by well-known symbolic keys, plus a
/// cancellation flag. Filter-pipeline decorators may inject standardized
/// keys into a fresh context before it is attached to the request (see
/// [`crate::session::SessionContext::decorate`]).
#[derive(Default)]
pub struct SessionContext {
    values: HashMap<&'static str, Arc<dyn Any + Send + Sync>>,
    cancelled: AtomicBool,
    debug: AtomicBool,
    request_id: Uuid,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("request_id", &self.request_id)
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .field("cancelled", &self.is_cancelled())
            .field("debug", &self.is_debug())
            .finish()
    }
}

impl SessionContext {
    /// A fresh context, stamped with its own request id (§4.2's "log a
    /// warning including method, UUID, URI, reason" needs one per request;
    /// generated here rather than left to an optional decorator since
    /// every request gets one, decorated or not).
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            ..Self::default()
        }
    }

    /// The request id this context was created with.
    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Store a value under a well-known symbolic key.
    pub fn set<T: Any + Send + Sync>(&mut self, key: &'static str, value: T) {
        self.values.insert(key, Arc::new(value));
    }

    /// Fetch a value previously stored under `key`, if present and of type `T`.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self, key: &'static str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Mark this context cancelled. After cancellation, no late body chunk
    /// for the owning request may be forwarded downstream.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn set_debug(&self, debug: bool) {
        self.debug.store(debug, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_debug(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }
}

/// Hook invoked with a fresh [`SessionContext`] before it is attached to an
/// inbound request, letting a host inject standardized keys (request id,
/// tenant, deadline, ...). Blank by default; an overridable hook for hosts
/// that need to bind extra context before a request starts.
pub trait SessionContextDecorator: Send + Sync {
    fn decorate(&self, ctx: &mut SessionContext);
}

/// A decorator that does nothing, used when no host-specific context
/// injection is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDecorator;

impl SessionContextDecorator for NoopDecorator {
    fn decorate(&self, _ctx: &mut SessionContext) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_context_gets_a_distinct_request_id() {
        let a = SessionContext::new();
        let b = SessionContext::new();
        assert_ne!(a.request_id(), b.request_id());
        assert!(!a.request_id().is_nil());
    }

    #[test]
    fn set_get_roundtrip_well_known_key() {
        let mut ctx = SessionContext::new();
        ctx.set("INBOUND_REQUEST", 42_u32);
        assert_eq!(ctx.get::<u32>("INBOUND_REQUEST"), Some(&42));
        assert_eq!(ctx.get::<String>("INBOUND_REQUEST"), None);
    }

    #[test]
    fn cancel_is_observable() {
        let ctx = SessionContext::new();
        assert!(!ctx.is_cancelled());
        ctx.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn decorator_can_inject_keys() {
        struct Inject;
        impl SessionContextDecorator for Inject {
            fn decorate(&self, ctx: &mut SessionContext) {
                ctx.set("request_id", "abc-123".to_string());
            }
        }

        let mut ctx = SessionContext::new();
        Inject.decorate(&mut ctx);
        assert_eq!(
            ctx.get::<String>("request_id").map(String::as_str),
            Some("abc-123")
        );
    }
}
