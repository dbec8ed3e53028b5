//! # Priority mailbox: per-entity exclusive message processing.
//!
//! Each controller-side agent link, and each agent's control channel, owns one
//! [`Mailbox`]. Producers enqueue from any thread; a single drain loop, run as a
//! tracked task of the [`TaskSupervisor`](crate::TaskSupervisor), hands the
//! messages to the [`Handler`] one at a time.
//!
//! Ordering: jump-ahead messages present at each dequeue go before any normal
//! message, each tier is FIFO, and a message already being processed is never
//! preempted.
//!
//! - [`Priority`] / [`Prioritized`] tier declared by the message type
//! - [`Handler`] per-mailbox message processor
//! - [`Mailbox`] the two-tier queue and its drain loop

mod handler;
mod priority;
mod queue;

pub use handler::Handler;
pub use priority::{Prioritized, Priority};
pub use queue::Mailbox;
