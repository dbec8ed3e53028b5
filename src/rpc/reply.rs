use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use super::codec::{Codec, JsonCodec};
use super::frame::{Frame, Outbound};
use crate::error::ReplyError;

/// Responder side of one received request.
///
/// Handed to the mailbox handler with the request; answering consumes the
/// port, so each request is answered at most once. Dropping it unanswered
/// leaves the remote caller to its own cancellation or timeout.
pub struct ReplyPort<C: Codec = JsonCodec> {
    seq: u32,
    outbound: Arc<dyn Outbound>,
    codec: C,
}

impl<C: Codec> ReplyPort<C> {
    pub(crate) fn new(seq: u32, outbound: Arc<dyn Outbound>, codec: C) -> Self {
        Self {
            seq,
            outbound,
            codec,
        }
    }

    /// Sequence number of the request being answered.
    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// Encodes `response` and sends it as the reply frame for this request.
    ///
    /// # Errors
    /// [`ReplyError::Codec`] or [`ReplyError::Transport`].
    pub async fn reply<T: Serialize + Sync + ?Sized>(self, response: &T) -> Result<(), ReplyError> {
        let payload = self.codec.encode(response)?;
        self.outbound.send(Frame::reply(self.seq, payload)).await
    }
}

impl<C: Codec> fmt::Debug for ReplyPort<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyPort").field("seq", &self.seq).finish()
    }
}
