//! Core types shared by the outbound connection pool and the inbound HTTP
//! lifecycle handlers: the `Channel` boundary trait, passport tracing,
//! origin/server identity, and per-request session context.

pub mod channel;
pub mod passport;
pub mod server;
pub mod session;

pub use channel::{AttrId, Channel, ChannelAttributes, EventLoopId, OutboundFrame, SharedPassport};
pub use passport::{PassportState, PassportTrace};
pub use server::{Server, ServerStats};
pub use session::{CompleteReason, NoopDecorator, SessionContext, SessionContextDecorator};
