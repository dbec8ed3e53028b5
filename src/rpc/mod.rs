//! # Request/reply over a message-oriented transport.
//!
//! The transport is external: it delivers decoded [`Frame`]s to
//! [`Connection::on_frame`], accepts frames through [`Outbound`], and calls
//! [`Connection::close`] on disconnect.
//!
//! - [`Codec`] / [`JsonCodec`] payload encoding
//! - [`Frame`] / [`FrameKind`] / [`Outbound`] the transport boundary
//! - [`ReplyCorrelator`] / [`PendingReply`] sequence-number correlation
//! - [`ReplyPort`] answering a received request
//! - [`Connection`] / [`Inbound`] glue between transport, correlator and mailbox

mod codec;
mod connection;
mod correlator;
mod frame;
mod reply;

pub use codec::{Codec, JsonCodec};
pub use connection::{Connection, Inbound};
pub use correlator::{PendingReply, ReplyCorrelator};
pub use frame::{Frame, FrameKind, Outbound};
pub use reply::ReplyPort;
