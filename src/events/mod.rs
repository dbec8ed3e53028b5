//! Runtime events: diagnostic records of contained failures and shutdown progress.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//!
//! ## Quick reference
//! - **Publishers**: `TaskSupervisor` (task failures, drain progress), `Mailbox`
//!   drain loops (handler failures), `ReplyCorrelator` (unmatched/expired replies,
//!   teardown).
//! - **Delivery**: an [`EventSubscribers<Event>`](crate::EventSubscribers) owned by
//!   the supervisor, reachable via `TaskSupervisor::events()`.

mod event;

pub use event::{Event, EventKind};
