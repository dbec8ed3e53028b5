//! # Connection: one transport link wired to a correlator and a mailbox.
//!
//! ```text
//!  transport inbound ──► on_frame(frame)
//!                          ├─ Reply          ──► correlator.complete(seq, payload)
//!                          └─ Request/OneWay ──► decode M ──► mailbox.enqueue(Inbound{msg, reply})
//!                                                              (tier declared by M)
//!  request(req, cancel) ──► correlator.send ──► Outbound
//!  notify(msg)          ──────────────────────► Outbound (one-way)
//!  close(reason)        ──► correlator.close_all
//! ```

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::codec::{Codec, JsonCodec};
use super::correlator::ReplyCorrelator;
use super::frame::{Frame, FrameKind, Outbound};
use super::reply::ReplyPort;
use crate::{
    core::{TaskId, TaskSupervisor},
    error::{ReplyError, RuntimeError, TaskError},
    mailbox::{Handler, Mailbox, Prioritized, Priority},
};

/// A decoded inbound message, with a reply port when the sender expects an answer.
pub struct Inbound<M, C: Codec = JsonCodec> {
    /// The decoded message.
    pub msg: M,
    /// Present for [`FrameKind::Request`] frames.
    pub reply: Option<ReplyPort<C>>,
}

impl<M: Prioritized, C: Codec> Prioritized for Inbound<M, C> {
    fn priority(&self) -> Priority {
        self.msg.priority()
    }
}

impl<M: fmt::Debug, C: Codec> fmt::Debug for Inbound<M, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inbound")
            .field("msg", &self.msg)
            .field("reply", &self.reply)
            .finish()
    }
}

/// One side of a logical connection: inbound routing, requests, teardown.
pub struct Connection<M: Send + 'static, C: Codec = JsonCodec> {
    name: Arc<str>,
    codec: C,
    outbound: Arc<dyn Outbound>,
    correlator: Arc<ReplyCorrelator<C>>,
    mailbox: Mailbox<Inbound<M, C>>,
    supervisor: Arc<TaskSupervisor>,
}

impl<M> Connection<M, JsonCodec>
where
    M: DeserializeOwned + Prioritized + Send + 'static,
{
    /// Creates a JSON connection and starts its reply expiration sweep.
    ///
    /// # Errors
    /// [`RuntimeError::SupervisorStopped`] if the supervisor is shutting down.
    pub fn new<H>(
        name: impl Into<Arc<str>>,
        outbound: Arc<dyn Outbound>,
        handler: H,
        supervisor: &Arc<TaskSupervisor>,
    ) -> Result<Self, RuntimeError>
    where
        H: Handler<Inbound<M, JsonCodec>>,
    {
        Self::with_codec(name, outbound, handler, supervisor, JsonCodec)
    }
}

impl<M, C> Connection<M, C>
where
    M: DeserializeOwned + Prioritized + Send + 'static,
    C: Codec,
{
    /// Creates a connection with a custom codec and starts its expiration sweep.
    ///
    /// # Errors
    /// [`RuntimeError::SupervisorStopped`] if the supervisor is shutting down.
    pub fn with_codec<H>(
        name: impl Into<Arc<str>>,
        outbound: Arc<dyn Outbound>,
        handler: H,
        supervisor: &Arc<TaskSupervisor>,
        codec: C,
    ) -> Result<Self, RuntimeError>
    where
        H: Handler<Inbound<M, C>>,
    {
        let name: Arc<str> = name.into();
        let correlator = Arc::new(ReplyCorrelator::with_codec(
            Arc::clone(&name),
            Arc::clone(&outbound),
            supervisor,
            codec.clone(),
        ));
        correlator.start_expiry(supervisor)?;
        let mailbox = Mailbox::new(Arc::clone(&name), handler, supervisor);
        Ok(Self {
            name,
            codec,
            outbound,
            correlator,
            mailbox,
            supervisor: Arc::clone(supervisor),
        })
    }

    /// Routes one frame delivered by the transport.
    ///
    /// Replies go to the correlator (unmatched ones are only logged).
    /// Requests and one-way messages are decoded and queued on the mailbox at
    /// the tier the decoded `M` declares; [`Frame::priority`] is not consulted.
    /// A payload that does not decode is logged and dropped.
    ///
    /// # Errors
    /// [`RuntimeError::SupervisorStopped`] if the mailbox cannot start draining.
    pub fn on_frame(&self, frame: Frame) -> Result<(), RuntimeError> {
        let Frame {
            seq, kind, payload, ..
        } = frame;
        match kind {
            FrameKind::Reply => {
                self.correlator.complete(seq, payload);
                Ok(())
            }
            FrameKind::Request | FrameKind::OneWay => {
                let msg: M = match self.codec.decode(&payload) {
                    Ok(msg) => msg,
                    Err(err) => {
                        tracing::warn!(conn = %self.name, seq, error = %err, "undecodable frame dropped");
                        return Ok(());
                    }
                };
                let reply = (kind == FrameKind::Request)
                    .then(|| ReplyPort::new(seq, Arc::clone(&self.outbound), self.codec.clone()));
                self.mailbox.enqueue(Inbound { msg, reply })
            }
        }
    }

    /// Sends a request and waits for its reply or for `cancel`.
    ///
    /// # Errors
    /// See [`ReplyCorrelator::send`].
    pub async fn request<Req, R>(&self, request: &Req, cancel: &CancellationToken) -> Result<R, ReplyError>
    where
        Req: Serialize + Prioritized + Sync + ?Sized,
        R: DeserializeOwned,
    {
        self.correlator.send(request, cancel).await
    }

    /// Sends a one-way message and waits for the transport to accept it.
    ///
    /// # Errors
    /// [`ReplyError::Codec`] or [`ReplyError::Transport`].
    pub async fn notify<T>(&self, msg: &T) -> Result<(), ReplyError>
    where
        T: Serialize + Prioritized + Sync + ?Sized,
    {
        let frame = self.one_way(msg)?;
        self.outbound.send(frame).await
    }

    /// Sends a one-way message from a tracked task without waiting.
    ///
    /// A transport failure is reported like any other task failure.
    ///
    /// # Errors
    /// [`ReplyError::Codec`] when encoding fails, [`ReplyError::Runtime`] when
    /// the supervisor is shutting down.
    pub fn notify_detached<T>(&self, msg: &T) -> Result<TaskId, ReplyError>
    where
        T: Serialize + Prioritized + ?Sized,
    {
        let frame = self.one_way(msg)?;
        let outbound = Arc::clone(&self.outbound);
        let id = self
            .supervisor
            .spawn(format!("notify:{}", self.name), move |_ctx| async move {
                outbound
                    .send(frame)
                    .await
                    .map_err(|err| TaskError::fail(err.to_string()))
            })?;
        Ok(id)
    }

    /// Teardown notification from the transport: fails every pending request.
    /// Returns the number of failed requests.
    pub fn close(&self, reason: impl Into<Arc<str>>) -> usize {
        self.correlator.close_all(reason)
    }

    /// Connection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The connection's correlator.
    pub fn correlator(&self) -> &Arc<ReplyCorrelator<C>> {
        &self.correlator
    }

    /// The connection's inbound mailbox.
    pub fn mailbox(&self) -> &Mailbox<Inbound<M, C>> {
        &self.mailbox
    }

    fn one_way<T>(&self, msg: &T) -> Result<Frame, ReplyError>
    where
        T: Serialize + Prioritized + ?Sized,
    {
        let payload = self.codec.encode(msg)?;
        Ok(Frame::one_way(msg.priority(), payload))
    }
}

impl<M: Send + 'static, C: Codec> fmt::Debug for Connection<M, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("correlator", &self.correlator)
            .finish()
    }
}
