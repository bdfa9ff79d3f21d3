//! A request that gets rejected by the filter pipeline before completion
//! (e.g. an auth check) still must: (1) answer the client with the
//! rejection response and close per §4.3, (2) silently drop any laggard
//! body chunk that arrives afterward (S6), and (3) let the caller release
//! the origin connection it had already acquired for downstream work, same
//! as if the request had succeeded — cancellation is a client-side
//! decision, not an origin-pool one.

use crate::{current_loop, fake_client_channel, fresh_passport, make_pool, FakeOriginFactory};
use bytes::Bytes;
use std::sync::Arc;
use viaduct_core::channel::testing::FakeChannel;
use viaduct_core::session::{CompleteReason, SessionContext};
use viaduct_http::message::{HeaderMultimap, RequestMessage, ResponseMessage};
use viaduct_http::pipeline_external::{FilterPipeline, PipelineOutcome};
use viaduct_http::receiver::{ClientRequestReceiver, InboundFrame, RequestHead};
use viaduct_http::writer::{ClientResponseWriter, InboundRequestInfo};

struct RejectWith401;

impl FilterPipeline for RejectWith401 {
    fn on_request(&self, _request: RequestMessage, ctx: Arc<SessionContext>) -> PipelineOutcome {
        // A real pipeline would cancel the context itself once it decides to
        // reject; the receiver's own `on_complete` (driven below with a
        // non-session-complete reason) is what actually flips the flag, but
        // marking it here too models "the pipeline already gave up on this
        // request" accurately for a rejection path.
        ctx.cancel();
        PipelineOutcome::Reject(ResponseMessage::new(401).with_header("Connection", "close"))
    }
}

#[tokio::test]
async fn rejected_request_closes_client_channel_and_releases_origin_connection() {
    let factory = FakeOriginFactory::new();
    let origin = FakeChannel::new();
    factory.push(origin.clone());
    let pool = make_pool(factory);

    // The pipeline would have acquired this to start forwarding before its
    // auth check failed; it still must hand it back.
    let origin_conn = pool
        .acquire(current_loop(), "POST", "/admin", 1, fresh_passport())
        .await
        .expect("origin acquire should succeed");

    let client_channel = fake_client_channel();
    let receiver = ClientRequestReceiver::new(Arc::new(RejectWith401));
    let writer = ClientResponseWriter::new();

    writer.on_start(InboundRequestInfo {
        protocol: "HTTP/1.1".to_string(),
        keep_alive: true,
        stream_id_header: None,
    });

    let mut headers = HeaderMultimap::new();
    headers.push("Authorization", "Bearer bad-token");
    let head = RequestHead {
        wire_version: "HTTP/1.1".to_string(),
        method: "POST".to_string(),
        uri: "/admin".to_string(),
        headers,
        aggregated_body: None,
    };

    let response = receiver
        .on_inbound_frame(client_channel.as_ref(), InboundFrame::Head(head))
        .expect("pipeline answers synchronously");
    assert_eq!(response.status, 401);

    let frames = writer
        .on_response(client_channel.as_ref(), response)
        .expect("rejection response is still written to the client");
    assert!(!frames.is_empty());

    // The pipeline is done with this request (reason != SessionComplete);
    // the receiver must cancel its context before a laggard chunk can land.
    receiver.on_complete(client_channel.as_ref(), CompleteReason::PipelineReject);
    writer.on_complete(client_channel.as_ref(), CompleteReason::PipelineReject);

    assert!(
        !client_channel.is_active(),
        "an explicit Connection: close response closes the client channel"
    );

    // A laggard body chunk for the now-cancelled/completed request must be
    // silently dropped, never forwarded (S6) — there is no current request
    // left in the receiver to forward it to.
    receiver.on_inbound_frame(
        client_channel.as_ref(),
        InboundFrame::Content {
            data: Bytes::from_static(b"late body bytes"),
            last: true,
        },
    );

    // Meanwhile, on the origin side, the pipeline's own cleanup releases the
    // connection it had acquired — independent of what happened to the
    // client channel.
    assert!(pool.release(&origin_conn));
    assert_eq!(pool.conns_in_pool(), 1);
}
