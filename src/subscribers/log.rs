//! # LogWriter: runtime event printer
//!
//! A minimal events subscriber that renders incoming [`Event`]s as `tracing`
//! records. Failures go out at `warn`, shutdown progress at `info`.
//!
//! ## Example output
//! ```text
//! [task-failed] task="expiry:agent-3" err="execution failed: io"
//! [handler-failed] mailbox="agent-3" err="unknown instance"
//! [reply-unmatched] conn="agent-3" seq=17 kind="stale"
//! [reply-timeout] conn="agent-3" seq=18 after_ms=30000
//! [connection-closed] conn="agent-3" reason="connection reset"
//! [shutdown-requested]
//! [all-stopped-within-grace]
//! [grace-exceeded] grace_ms=60000 aborted="sweep"
//! ```

use crate::events::{Event, EventKind};
use crate::subscribers::{EventSubscribers, OwnerId};

/// Event writer subscriber.
#[derive(Default, Clone, Copy, Debug)]
pub struct LogWriter;

impl LogWriter {
    /// Owner id the writer registers under.
    pub const OWNER: &'static str = "fleetvisor.log-writer";

    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Registers this writer on an events registry (idempotent).
    pub fn attach(self, events: &EventSubscribers<Event>) {
        events.subscribe(OwnerId::new(Self::OWNER), move |e: &Event| self.write(e));
    }

    /// Renders one event.
    pub fn write(&self, e: &Event) {
        let source = e.source.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::TaskFailed => {
                tracing::warn!("[task-failed] task={source:?} err={reason:?}");
            }
            EventKind::TaskPanicked => {
                tracing::warn!("[task-panicked] task={source:?} info={reason:?}");
            }
            EventKind::ShutdownRequested => {
                tracing::info!("[shutdown-requested]");
            }
            EventKind::AllStoppedWithin => {
                tracing::info!("[all-stopped-within-grace]");
            }
            EventKind::GraceExceeded => {
                tracing::warn!(
                    "[grace-exceeded] grace_ms={:?} aborted={reason:?}",
                    e.timeout_ms
                );
            }
            EventKind::HandlerFailed => {
                tracing::warn!("[handler-failed] mailbox={source:?} err={reason:?}");
            }
            EventKind::ReplyUnmatched => {
                tracing::warn!(
                    "[reply-unmatched] conn={source:?} seq={:?} kind={reason:?}",
                    e.reply_seq
                );
            }
            EventKind::ReplyTimedOut => {
                tracing::warn!(
                    "[reply-timeout] conn={source:?} seq={:?} after_ms={:?}",
                    e.reply_seq,
                    e.timeout_ms
                );
            }
            EventKind::ConnectionClosed => {
                tracing::info!("[connection-closed] conn={source:?} reason={reason:?}");
            }
        }
    }
}
