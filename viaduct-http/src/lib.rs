pub mod error;
pub mod message;
pub mod pipeline_external;
pub mod receiver;
pub mod writer;

pub use error::{GatewayError, WriteStage};
pub use message::{
    HeaderMultimap, InFlightRequest, QueryParams, RequestMessage, ResponseMessage, ZUUL_REQ,
    ZUUL_RESP,
};
pub use pipeline_external::{FilterPipeline, PipelineOutcome};
pub use receiver::{ClientRequestReceiver, InboundFrame, RequestHead};
pub use writer::{ClientResponseWriter, InboundRequestInfo};
