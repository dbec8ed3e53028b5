//! Wire unit exchanged with the transport, and the transport's send side.
//!
//! The core never parses bytes off a socket: the transport hands over decoded
//! [`Frame`]s and accepts frames through [`Outbound`]. A reply frame carries the
//! sequence number of the request it answers; one-way frames carry `seq = 0`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ReplyError;
use crate::mailbox::Priority;

/// Role of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    /// Expects a [`FrameKind::Reply`] tagged with the same `seq`.
    Request,
    /// Answers the request with the same `seq`.
    Reply,
    /// Fire-and-forget message; `seq` is unused.
    OneWay,
}

/// One message on a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Correlation sequence number (0 for one-way frames).
    pub seq: u32,
    /// Frame role.
    pub kind: FrameKind,
    /// Tier the sender assigned to the payload.
    ///
    /// A hint for the transport (for instance to order its own write queue).
    /// The receiving [`Connection`](super::Connection) ignores it and queues
    /// by the decoded message's own [`Prioritized`](crate::Prioritized) tier.
    pub priority: Priority,
    /// Encoded payload.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Builds a request frame.
    pub fn request(seq: u32, priority: Priority, payload: Vec<u8>) -> Self {
        Self {
            seq,
            kind: FrameKind::Request,
            priority,
            payload,
        }
    }

    /// Builds a reply frame for request `seq`.
    pub fn reply(seq: u32, payload: Vec<u8>) -> Self {
        Self {
            seq,
            kind: FrameKind::Reply,
            priority: Priority::Normal,
            payload,
        }
    }

    /// Builds a one-way frame.
    pub fn one_way(priority: Priority, payload: Vec<u8>) -> Self {
        Self {
            seq: 0,
            kind: FrameKind::OneWay,
            priority,
            payload,
        }
    }
}

/// Send side of a transport connection.
///
/// Implementations either hand the frame to the wire or report a failure; they
/// must not block the caller on the remote peer.
#[async_trait]
pub trait Outbound: Send + Sync + 'static {
    /// Transmits one frame.
    ///
    /// # Errors
    /// [`ReplyError::Transport`] when the frame cannot be transmitted.
    async fn send(&self, frame: Frame) -> Result<(), ReplyError>;
}

/// In-process transport: frames go to the receiving half of a channel.
#[async_trait]
impl Outbound for mpsc::UnboundedSender<Frame> {
    async fn send(&self, frame: Frame) -> Result<(), ReplyError> {
        mpsc::UnboundedSender::send(self, frame)
            .map_err(|_| ReplyError::Transport("peer channel closed".into()))
    }
}
