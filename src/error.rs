//! Error types used by the fleetvisor runtime.
//!
//! This module defines the error enums surfaced to callers:
//!
//! - [`RuntimeError`]: errors raised by the runtime itself (scheduling after shutdown, drain overrun).
//! - [`TaskError`]: errors raised by individual tracked operations and mailbox handlers.
//! - [`ReplyError`]: errors surfaced to a caller awaiting a reply.
//! - [`CodecError`]: payload serialization failures.
//!
//! Every type provides `as_label` for logging/metrics.

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by the runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Work was submitted after shutdown began.
    #[error("supervisor stopped; no new work accepted")]
    SupervisorStopped,

    /// Shutdown grace period was exceeded; the listed tasks were aborted.
    #[error("shutdown timeout {grace:?} exceeded; aborted: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Names of tasks that did not stop in time.
        stuck: Vec<String>,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use fleetvisor::RuntimeError;
    ///
    /// assert_eq!(RuntimeError::SupervisorStopped.as_label(), "runtime_supervisor_stopped");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::SupervisorStopped => "runtime_supervisor_stopped",
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
        }
    }
}

/// # Errors produced by tracked operations.
///
/// Returned by operations run under the [`TaskSupervisor`](crate::TaskSupervisor)
/// and by mailbox [`Handler`](crate::Handler)s. The supervisor logs and discards
/// them; only the operation's own [`TaskHandle`](crate::TaskHandle) observes them.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Non-recoverable failure.
    #[error("fatal error: {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },

    /// Operation failed but may succeed if retried.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Operation stopped because its cancellation scope fired (or it was aborted).
    #[error("context cancelled")]
    Canceled,

    /// Operation panicked; the panic was caught by the supervisor.
    #[error("panicked: {info}")]
    Panicked {
        /// Panic payload rendered as text.
        info: String,
    },
}

impl TaskError {
    /// Shorthand for [`TaskError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        TaskError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use fleetvisor::TaskError;
    ///
    /// assert_eq!(TaskError::Canceled.as_label(), "task_canceled");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Fatal { .. } => "task_fatal",
            TaskError::Fail { .. } => "task_failed",
            TaskError::Canceled => "task_canceled",
            TaskError::Panicked { .. } => "task_panicked",
        }
    }

    /// Indicates whether the error type is safe to retry.
    ///
    /// Returns `true` for [`TaskError::Fail`] only.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Fail { .. })
    }
}

/// # Errors surfaced to a caller awaiting a reply.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ReplyError {
    /// The caller's cancellation token fired before the reply arrived.
    #[error("request canceled")]
    RequestCanceled,

    /// The connection was torn down while the reply was pending.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Teardown reason given by the transport.
        reason: String,
    },

    /// No reply arrived before the pending entry's deadline.
    #[error("no reply after {after:?}")]
    TimedOut {
        /// The deadline that elapsed.
        after: Duration,
    },

    /// The transport refused or failed to transmit the request.
    #[error("transport error: {0}")]
    Transport(String),

    /// Request encoding or reply decoding failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The runtime refused the background work needed to send.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl ReplyError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ReplyError::RequestCanceled => "reply_request_canceled",
            ReplyError::ConnectionClosed { .. } => "reply_connection_closed",
            ReplyError::TimedOut { .. } => "reply_timed_out",
            ReplyError::Transport(_) => "reply_transport",
            ReplyError::Codec(_) => "reply_codec",
            ReplyError::Runtime(_) => "reply_runtime",
        }
    }
}

/// Payload serialization failure.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CodecError {
    /// Failed to encode a message to bytes.
    #[error("encode error: {0}")]
    Encode(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// Failed to decode bytes to a message.
    #[error("decode error: {0}")]
    Decode(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Renders a caught panic payload as text.
pub(crate) fn panic_info(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
