//! # Runtime events emitted by the supervisor, mailboxes and correlators.
//!
//! The [`EventKind`] enum classifies event types across three categories:
//! - **Task events**: contained failures of tracked operations
//! - **Shutdown events**: drain progress of the supervisor
//! - **Messaging events**: handler failures, unmatched or expired replies, connection teardown
//!
//! The [`Event`] struct carries additional metadata such as timestamps, the
//! source name (task, mailbox or connection), reasons, and reply sequence numbers.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are observed out of order.
//!
//! ## Example
//! ```rust
//! use fleetvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::ReplyUnmatched)
//!     .with_source("agent-7")
//!     .with_reply_seq(42)
//!     .with_reason("stale");
//!
//! assert_eq!(ev.kind, EventKind::ReplyUnmatched);
//! assert_eq!(ev.source.as_deref(), Some("agent-7"));
//! assert_eq!(ev.reply_seq, Some(42));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Task events ===
    /// Tracked operation returned an error; it was removed from tracking.
    ///
    /// Sets:
    /// - `source`: task name
    /// - `reason`: error message
    TaskFailed,

    /// Tracked operation panicked; the panic was caught.
    ///
    /// Sets:
    /// - `source`: task name
    /// - `reason`: panic info
    TaskPanicked,

    // === Shutdown events ===
    /// Shutdown began: the cancellation scope fired.
    ShutdownRequested,

    /// Every tracked task stopped within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded; remaining tasks were aborted.
    ///
    /// Sets:
    /// - `reason`: names of the aborted tasks
    /// - `timeout_ms`: configured grace
    GraceExceeded,

    // === Messaging events ===
    /// A mailbox handler failed (error or panic) on one message; the loop continued.
    ///
    /// Sets:
    /// - `source`: mailbox name
    /// - `reason`: error message
    HandlerFailed,

    /// A reply arrived for a sequence number with no pending entry.
    ///
    /// Sets:
    /// - `source`: connection name
    /// - `reply_seq`: sequence number of the reply
    /// - `reason`: `stale` (issued here earlier) or `unknown` (never issued)
    ReplyUnmatched,

    /// A pending reply passed its deadline and was failed by the expiration sweep.
    ///
    /// Sets:
    /// - `source`: connection name
    /// - `reply_seq`: sequence number
    /// - `timeout_ms`: the elapsed deadline
    ReplyTimedOut,

    /// A connection was torn down; its pending replies were failed.
    ///
    /// Sets:
    /// - `source`: connection name
    /// - `reason`: teardown reason
    ConnectionClosed,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Name of the task, mailbox or connection that produced the event.
    pub source: Option<Arc<str>>,
    /// Human-readable reason (errors, teardown details, etc.).
    pub reason: Option<Arc<str>>,
    /// Reply sequence number, for messaging events.
    pub reply_seq: Option<u32>,
    /// Timeout or grace in milliseconds (compact).
    pub timeout_ms: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            source: None,
            reason: None,
            reply_seq: None,
            timeout_ms: None,
        }
    }

    /// Attaches the producing task, mailbox or connection name.
    #[inline]
    pub fn with_source(mut self, source: impl Into<Arc<str>>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a reply sequence number.
    #[inline]
    pub fn with_reply_seq(mut self, seq: u32) -> Self {
        self.reply_seq = Some(seq);
        self
    }

    /// Attaches a duration (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.timeout_ms = Some(ms);
        self
    }

    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(
            self.kind,
            EventKind::TaskFailed | EventKind::TaskPanicked | EventKind::HandlerFailed
        )
    }
}
