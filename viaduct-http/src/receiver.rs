//! `ClientRequestReceiver` (§4.2): translates framed inbound HTTP into an
//! internal [`RequestMessage`], forwards it downstream, and guards against
//! laggard body frames arriving after cancellation.

use crate::error::GatewayError;
use crate::message::{HeaderMultimap, InFlightRequest, RequestMessage, ResponseMessage, ZUUL_REQ, ZUUL_RESP};
use crate::pipeline_external::{FilterPipeline, PipelineOutcome};
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use tracing::warn;
use viaduct_core::channel::{attrs, OutboundFrame};
use viaduct_core::passport::PassportState;
use viaduct_core::session::{CompleteReason, SessionContext, SessionContextDecorator};
use viaduct_core::Channel;

/// A decoded inbound request head, as the (external) HTTP codec would hand
/// it to this receiver. Already parsed into method/URI/headers text, but
/// not yet turned into a [`RequestMessage`].
#[derive(Debug, Clone)]
pub struct RequestHead {
    /// Wire version text (e.g. `"HTTP/1.1"`), used unless an ALPN-derived
    /// protocol attribute is already set on the channel.
    pub wire_version: String,
    pub method: String,
    pub uri: String,
    pub headers: HeaderMultimap,
    /// Present when the codec hands over a fully aggregated request (an
    /// HTTP/2 full-message variant) rather than streaming content frames.
    pub aggregated_body: Option<Bytes>,
}

/// One inbound frame, as produced by the upstream HTTP codec (§6).
pub enum InboundFrame {
    /// A successfully decoded request head.
    Head(RequestHead),
    /// Decoding failed; carries the attempted URI (if any was recoverable)
    /// and a message for the 400 response and log line.
    DecodeFailure { uri: String, message: String },
    /// A body frame.
    Content { data: Bytes, last: bool },
    /// Already handled upstream by proxy-protocol parsing (out of scope).
    ProxyProtocolInfo,
}

/// Translates inbound frames into [`RequestMessage`]s and drives them
/// through the (external) filter pipeline. One instance per channel.
pub struct ClientRequestReceiver {
    pipeline: Arc<dyn FilterPipeline>,
    decorator: Arc<dyn SessionContextDecorator>,
    current: Mutex<Option<InFlightRequest>>,
}

impl ClientRequestReceiver {
    #[must_use]
    pub fn new(pipeline: Arc<dyn FilterPipeline>) -> Self {
        Self {
            pipeline,
            decorator: Arc::new(viaduct_core::NoopDecorator),
            current: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_decorator(mut self, decorator: Arc<dyn SessionContextDecorator>) -> Self {
        self.decorator = decorator;
        self
    }

    /// §4.2 "On inbound frame". Returns the response the filter pipeline
    /// produced, if the frame synchronously completed a request-response
    /// cycle (only a [`InboundFrame::Head`] can); the caller (production
    /// event loop, or a test driving both handlers together) is
    /// responsible for handing that response to
    /// [`crate::writer::ClientResponseWriter`] — this receiver only
    /// translates and forwards, it never serializes a response itself.
    pub fn on_inbound_frame(
        &self,
        channel: &dyn Channel,
        frame: InboundFrame,
    ) -> Option<ResponseMessage> {
        match frame {
            InboundFrame::Head(head) => self.on_head(channel, head),
            InboundFrame::DecodeFailure { uri, message } => {
                self.on_decode_failure(channel, &uri, &message);
                None
            }
            InboundFrame::Content { data, last } => {
                self.on_content(data, last);
                None
            }
            InboundFrame::ProxyProtocolInfo => {
                // Already handled upstream; nothing to release — the data
                // never reached us as an owned buffer in this model.
                None
            }
        }
    }

    fn on_decode_failure(&self, channel: &dyn Channel, uri: &str, message: &str) {
        let err = GatewayError::Decode(format!("{message} (uri={uri})"));
        warn!(uri, message, "failed to decode inbound request");
        #[cfg(feature = "metrics")]
        {
            viaduct_observability::gateway_metrics().incr_requests_rejected("decode_error");
        }
        channel.write(OutboundFrame::ResponseHead {
            status: err.status_hint().unwrap_or(400),
        });
    }

    fn on_head(&self, channel: &dyn Channel, head: RequestHead) -> Option<ResponseMessage> {
        #[cfg(feature = "metrics")]
        {
            viaduct_observability::gateway_metrics().incr_requests_received(&head.method.to_ascii_lowercase());
        }
        let mut headers = head.headers;
        let has_body = RequestMessage::compute_has_body(&headers);

        let expect_continue = headers
            .get_first("expect")
            .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"));
        if expect_continue {
            channel.write(OutboundFrame::ResponseHead { status: 100 });
            headers.remove("expect");
        }

        let mut context = SessionContext::new();
        self.decorator.decorate(&mut context);
        let context = Arc::new(context);

        let protocol = channel
            .attrs()
            .get(attrs::PROTOCOL_NAME)
            .unwrap_or(head.wire_version);
        let ssl_info = channel.attrs().get(attrs::SSL_INFO);
        let scheme: &'static str = if ssl_info.is_some() { "https" } else { "http" };
        let (path, query) = RequestMessage::split_uri(&head.uri);
        let local_port = channel.attrs().get(attrs::LOCAL_PORT).unwrap_or(0);
        let client_ip = channel
            .attrs()
            .get(attrs::SOURCE_ADDRESS)
            .map(|addr: std::net::SocketAddr| addr.ip());

        let request = RequestMessage {
            protocol,
            method: head.method.to_ascii_lowercase(),
            path,
            query,
            headers,
            client_ip,
            scheme,
            local_port,
            local_server_name: None,
            ssl_info,
            body: head.aggregated_body,
            has_body,
        };

        channel.attrs().set(ZUUL_REQ, request.clone());
        {
            let mut slot = self.current.lock().expect("receiver mutex poisoned");
            *slot = Some(InFlightRequest {
                request: request.clone(),
                context: context.clone(),
            });
        }

        match self.pipeline.on_request(request, context) {
            PipelineOutcome::Respond(response) | PipelineOutcome::Reject(response) => {
                Some(response)
            }
        }
    }

    fn on_content(&self, data: Bytes, last: bool) {
        let slot = self.current.lock().expect("receiver mutex poisoned");
        match slot.as_ref() {
            Some(in_flight) if !in_flight.context.is_cancelled() => {
                self.pipeline.on_content(data, last, in_flight.context.clone());
            }
            _ => {
                // Laggard chunk: no current request, or it was cancelled.
                // Release silently, never forward.
                drop(data);
            }
        }
    }

    /// §4.2 "On lifecycle event `Complete(reason)`".
    pub fn on_complete(&self, channel: &dyn Channel, reason: CompleteReason) {
        let in_flight = self.current.lock().expect("receiver mutex poisoned").take();

        if let Some(in_flight) = in_flight {
            in_flight.context.cancel();
            let mut passport = channel.passport().lock().expect("passport mutex poisoned");
            if !passport.has_recorded(PassportState::OutRespLastContentSent) {
                passport.record(PassportState::InReqCancelled);
            }
            drop(passport);

            if !reason.is_session_complete() {
                warn!(
                    method = %in_flight.request.method,
                    request_id = %in_flight.context.request_id(),
                    uri = %in_flight.request.path,
                    ?reason,
                    "request cancelled before completion"
                );
                if in_flight.context.is_debug() {
                    tracing::debug!(request = ?in_flight.request, "request/routing debug dump");
                }
            }
        }

        channel.attrs().remove(ZUUL_REQ);
        channel.attrs().remove(ZUUL_RESP);
    }
}
