//! The downstream collaborator this core hands requests to and receives
//! responses from (§6). Routing, retries, circuit breaking and endpoint
//! logic all live on the other side of this trait — Non-goals this crate
//! does not implement.

use crate::message::{RequestMessage, ResponseMessage};
use bytes::Bytes;
use std::sync::Arc;
use viaduct_core::session::SessionContext;

/// What the filter pipeline decided to do with a forwarded request. Minimal
/// surface needed to drive the lifecycle handlers' `Start`/`Complete`
/// events end-to-end in tests and example wiring (SPEC_FULL §6).
pub enum PipelineOutcome {
    /// The pipeline produced a response to write back to the client.
    Respond(ResponseMessage),
    /// The pipeline rejected the request outright (e.g. before routing).
    Reject(ResponseMessage),
}

/// The minimal interface this core needs from the filter/endpoint runtime.
/// Production code supplies its own implementation backed by real routing,
/// load balancing and the outbound pool; tests use a scripted fake.
pub trait FilterPipeline: Send + Sync {
    /// Handle one request. `context` is the same [`SessionContext`] that
    /// was attached to the request by [`crate::receiver::ClientRequestReceiver`],
    /// so the pipeline can check/observe cancellation.
    fn on_request(
        &self,
        request: RequestMessage,
        context: Arc<SessionContext>,
    ) -> PipelineOutcome;

    /// Forward one body chunk for the request `context` belongs to (§4.2
    /// "On content": forward only if the channel has a current request and
    /// it has not been cancelled). Most pipelines only need the aggregated
    /// request and never override this; default is a no-op drop.
    fn on_content(&self, data: Bytes, last: bool, context: Arc<SessionContext>) {
        let _ = (data, last, context);
    }
}

#[cfg(test)]
pub mod testing {
    use super::{FilterPipeline, PipelineOutcome, RequestMessage, ResponseMessage, SessionContext};
    use std::sync::Arc;

    /// A filter pipeline that always answers with a fixed status, used in
    /// receiver/writer unit tests.
    pub struct FixedResponsePipeline {
        pub status: u16,
    }

    impl FilterPipeline for FixedResponsePipeline {
        fn on_request(
            &self,
            _request: RequestMessage,
            _context: Arc<SessionContext>,
        ) -> PipelineOutcome {
            PipelineOutcome::Respond(ResponseMessage::new(self.status))
        }
    }
}
