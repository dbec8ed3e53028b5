//! Runtime core: tracked background work and lifecycle.
//!
//! The public API from this module is [`TaskSupervisor`], which starts
//! operations under a shared cancellation scope, contains their failures, and
//! drains them on shutdown.
//!
//! Internal modules:
//! - [`handle`]: task identity and the awaitable per-task result;
//! - [`supervisor`]: tracking, failure containment, shutdown with grace.

mod handle;
mod supervisor;

pub use handle::{TaskHandle, TaskId};
pub use supervisor::TaskSupervisor;
