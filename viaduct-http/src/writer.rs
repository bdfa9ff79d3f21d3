//! `ClientResponseWriter` (§4.3): serializes one [`ResponseMessage`] per
//! request/response cycle back to the client, enforces at-most-one active
//! outbound response per channel, and decides connection reuse vs close.

use crate::error::{GatewayError, WriteStage};
use crate::message::ResponseMessage;
use bytes::Bytes;
use std::sync::Mutex;
use tracing::{debug, warn};
use viaduct_core::channel::OutboundFrame;
use viaduct_core::passport::PassportState;
use viaduct_core::session::CompleteReason;
use viaduct_core::Channel;

/// Request metadata the writer needs to build the wire response (§4.3.1)
/// without depending on the receiver's `RequestMessage` type directly —
/// only the handful of fields the response construction rule actually
/// reads.
#[derive(Debug, Clone, Default)]
pub struct InboundRequestInfo {
    pub protocol: String,
    pub keep_alive: bool,
    /// HTTP/2 stream-correlation header value, if the inbound request
    /// carried one, echoed onto the response per §4.3.1 / §6.
    pub stream_id_header: Option<String>,
}

#[derive(Default)]
struct WriterState {
    is_handling_request: bool,
    started_sending_response: bool,
    close_connection: bool,
    current_response: Option<ResponseMessage>,
    inbound: InboundRequestInfo,
}

/// One instance per inbound channel, mirroring [`crate::receiver::ClientRequestReceiver`].
pub struct ClientResponseWriter {
    state: Mutex<WriterState>,
}

impl Default for ClientResponseWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientResponseWriter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WriterState::default()),
        }
    }

    /// `Start` event (§4.3 Lifecycle transitions).
    pub fn on_start(&self, inbound: InboundRequestInfo) {
        let mut state = self.state.lock().expect("writer mutex poisoned");
        state.is_handling_request = true;
        state.started_sending_response = false;
        state.close_connection = false;
        state.current_response = None;
        state.inbound = inbound;
    }

    /// `Complete(reason)` event.
    pub fn on_complete(&self, channel: &dyn Channel, reason: CompleteReason) {
        let (was_handling, close) = {
            let mut state = self.state.lock().expect("writer mutex poisoned");
            state.current_response = None;
            let was_handling = state.is_handling_request;
            let close = state.close_connection;
            state.is_handling_request = false;
            (was_handling, close)
        };

        if reason.is_session_complete() && !close {
            channel.read();
        } else {
            channel.close();
            if was_handling {
                warn!(?reason, "channel closed while still handling a request");
            }
        }
    }

    /// `IdleState` event: debug log only, no state transition.
    pub fn on_idle(&self) {
        debug!("idle state observed by response writer");
    }

    /// Receipt of a [`ResponseMessage`] from the filter pipeline. Returns
    /// the frames to write, in order, or `None` if the response was
    /// dropped because of the idle/timeout-during-streaming race (§4.3).
    pub fn on_response(
        &self,
        channel: &dyn Channel,
        response: ResponseMessage,
    ) -> Option<Vec<OutboundFrame>> {
        let should_discard_and_close = {
            let state = self.state.lock().expect("writer mutex poisoned");
            !state.is_handling_request || state.started_sending_response
        };

        if should_discard_and_close {
            channel.close();
            return None;
        }

        // §4.3.1: the wire decides to close either because the pipeline's
        // response explicitly asked for it, or because the inbound request
        // itself wasn't keep-alive (HTTP/1.0, or an explicit inbound
        // close). Checking only the former would mean plain HTTP/1.0
        // traffic never actually gets its connection closed after Complete.
        let close_connection = {
            let state = self.state.lock().expect("writer mutex poisoned");
            response.wants_close() || !state.inbound.keep_alive
        };
        #[cfg(feature = "metrics")]
        {
            viaduct_observability::gateway_metrics()
                .incr_responses_written(viaduct_observability::status_class(response.status));
        }
        let wire = self.build_wire_response(&response);
        channel.attrs().set(crate::message::ZUUL_RESP, response.clone());

        {
            let mut state = self.state.lock().expect("writer mutex poisoned");
            state.started_sending_response = true;
            state.close_connection = close_connection;
            state.current_response = Some(response);
        }

        let mut frames = vec![OutboundFrame::ResponseHead { status: wire.status }];
        let mut wrote_last = false;
        for (i, chunk) in wire.body.iter().enumerate() {
            let last = i + 1 == wire.body.len();
            frames.push(OutboundFrame::Content { data: chunk.as_ref().clone(), last });
            wrote_last = last;
        }
        if wire.body.is_empty() {
            frames.push(OutboundFrame::Content { data: Bytes::new(), last: true });
            wrote_last = true;
        }

        for frame in &frames {
            channel.write(frame.clone());
        }
        if wrote_last {
            channel
                .passport()
                .lock()
                .expect("passport mutex poisoned")
                .record(PassportState::OutRespLastContentSent);
        }

        Some(frames)
    }

    /// A streaming body chunk arriving after the head has already been
    /// written.
    pub fn on_content_chunk(&self, channel: &dyn Channel, data: Bytes, last: bool) {
        if channel.is_active() {
            channel.write(OutboundFrame::Content { data, last });
            if last {
                channel
                    .passport()
                    .lock()
                    .expect("passport mutex poisoned")
                    .record(PassportState::OutRespLastContentSent);
            }
        } else {
            channel.close();
        }
    }

    /// §4.3.1 wire response construction.
    fn build_wire_response(&self, response: &ResponseMessage) -> WireResponse {
        let state = self.state.lock().expect("writer mutex poisoned");
        let mut headers = response.headers.clone();

        if !headers.contains("content-length") && !headers.get_first("transfer-encoding").is_some_and(|v| v.eq_ignore_ascii_case("chunked")) {
            headers.push("Transfer-Encoding", "chunked");
        }

        if state.inbound.keep_alive && !response.wants_close() {
            headers.push("Connection", "keep-alive");
        } else if !response.wants_close() {
            headers.push("Connection", "close");
        }

        if let Some(stream_id) = state.inbound.stream_id_header.clone() {
            headers.push("x-http2-stream-id", stream_id);
        }

        WireResponse {
            status: response.status,
            body: response.body.clone(),
        }
    }

    /// §4.3 `exceptionCaught`.
    pub fn on_exception(&self, channel: &dyn Channel, error: &GatewayError) {
        let status = match error {
            GatewayError::ReadTimeout => 504,
            other => other.status_hint().unwrap_or(500),
        };

        let (handling, already_started) = {
            let state = self.state.lock().expect("writer mutex poisoned");
            (state.is_handling_request, state.started_sending_response)
        };

        if handling && !already_started && channel.is_active() {
            #[cfg(feature = "metrics")]
            {
                viaduct_observability::gateway_metrics()
                    .incr_responses_written(viaduct_observability::status_class(status));
            }
            channel.write(OutboundFrame::ResponseHead { status });
            channel.write(OutboundFrame::Content { data: Bytes::new(), last: true });
            channel.close();
        } else {
            channel.close();
        }
    }

    /// Surfaces a write failure as [`GatewayError::Write`] for the caller
    /// to log/propagate, per §4.2's "attach a listener ... fires
    /// `WriteError` upward" write-completion contract.
    #[must_use]
    pub fn write_failed(stage: WriteStage) -> GatewayError {
        GatewayError::Write { stage }
    }
}

struct WireResponse {
    status: u16,
    body: Vec<std::sync::Arc<bytes::Bytes>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use viaduct_core::channel::testing::FakeChannel;

    fn started(writer: &ClientResponseWriter, keep_alive: bool) {
        writer.on_start(InboundRequestInfo {
            protocol: "HTTP/1.1".to_string(),
            keep_alive,
            stream_id_header: None,
        });
    }

    #[test]
    fn zuul_resp_attr_is_set_when_response_is_accepted() {
        let channel = FakeChannel::new();
        let writer = ClientResponseWriter::new();
        started(&writer, true);

        writer.on_response(channel.as_ref(), ResponseMessage::new(200));
        assert!(channel.attrs().get(crate::message::ZUUL_RESP).is_some());
    }

    #[test]
    fn response_body_bytes_reach_the_wire() {
        let channel = FakeChannel::new();
        let writer = ClientResponseWriter::new();
        started(&writer, true);

        let response = ResponseMessage::new(200).with_body(&b"chunk-one"[..]).with_body(&b"chunk-two"[..]);
        writer.on_response(channel.as_ref(), response);

        let writes = channel.writes.lock().unwrap();
        let bodies: Vec<_> = writes
            .iter()
            .filter_map(|f| match f {
                OutboundFrame::Content { data, .. } => Some(data.clone()),
                OutboundFrame::ResponseHead { .. } => None,
            })
            .collect();
        assert_eq!(bodies, vec![Bytes::from_static(b"chunk-one"), Bytes::from_static(b"chunk-two")]);
        assert!(matches!(writes.last(), Some(OutboundFrame::Content { last: true, .. })));
    }

    #[test]
    fn adds_chunked_encoding_when_absent() {
        let channel = FakeChannel::new();
        let writer = ClientResponseWriter::new();
        started(&writer, true);

        writer.on_response(channel.as_ref(), ResponseMessage::new(200));
        // Re-inspect via a second response attempt to confirm header was
        // added: check through the close race branch instead, since the
        // writer doesn't expose wire headers directly — assert no panic
        // and that writes occurred.
        assert!(!channel.writes.lock().unwrap().is_empty());
    }

    // S7 — keep-alive vs close.
    #[test]
    fn s7_keep_alive_reads_next_request_on_session_complete() {
        let channel = FakeChannel::new();
        let writer = ClientResponseWriter::new();
        started(&writer, true);
        writer.on_response(channel.as_ref(), ResponseMessage::new(200));
        writer.on_complete(channel.as_ref(), CompleteReason::SessionComplete);

        assert_eq!(*channel.read_requests.lock().unwrap(), 1);
        assert!(channel.is_active());
    }

    #[test]
    fn s7_http10_or_explicit_close_closes_after_complete() {
        let channel = FakeChannel::new();
        let writer = ClientResponseWriter::new();
        started(&writer, false);
        writer.on_response(
            channel.as_ref(),
            ResponseMessage::new(200).with_header("Connection", "close"),
        );
        writer.on_complete(channel.as_ref(), CompleteReason::SessionComplete);

        assert!(!channel.is_active());
    }

    #[test]
    fn s7_http10_without_explicit_close_header_still_closes_after_complete() {
        let channel = FakeChannel::new();
        let writer = ClientResponseWriter::new();
        started(&writer, false);
        writer.on_response(channel.as_ref(), ResponseMessage::new(200));
        writer.on_complete(channel.as_ref(), CompleteReason::SessionComplete);

        assert!(!channel.is_active());
    }

    #[test]
    fn second_response_while_already_started_closes_channel() {
        let channel = FakeChannel::new();
        let writer = ClientResponseWriter::new();
        started(&writer, true);
        writer.on_response(channel.as_ref(), ResponseMessage::new(200));
        let second = writer.on_response(channel.as_ref(), ResponseMessage::new(500));
        assert!(second.is_none());
        assert!(!channel.is_active());
    }

    #[test]
    fn response_without_start_is_discarded_and_closes() {
        let channel = FakeChannel::new();
        let writer = ClientResponseWriter::new();
        let result = writer.on_response(channel.as_ref(), ResponseMessage::new(200));
        assert!(result.is_none());
        assert!(!channel.is_active());
    }

    #[test]
    fn exception_before_response_writes_status_only_and_closes() {
        let channel = FakeChannel::new();
        let writer = ClientResponseWriter::new();
        started(&writer, true);
        writer.on_exception(channel.as_ref(), &GatewayError::ReadTimeout);

        let writes = channel.writes.lock().unwrap();
        assert!(matches!(writes[0], OutboundFrame::ResponseHead { status: 504 }));
        drop(writes);
        assert!(!channel.is_active());
    }
}
