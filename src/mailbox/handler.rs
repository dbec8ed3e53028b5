use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;

/// Processes the messages of one mailbox, strictly one at a time.
///
/// `handle` is never called concurrently for the same mailbox, so the
/// implementation may treat its own state as single-threaded (interior
/// mutability is still needed because `&self` is shared).
///
/// An `Err` or a panic is logged and published as
/// [`EventKind::HandlerFailed`](crate::EventKind::HandlerFailed); the mailbox
/// then continues with the next message.
///
/// # Example
/// ```rust
/// use async_trait::async_trait;
/// use tokio_util::sync::CancellationToken;
/// use fleetvisor::{Handler, TaskError};
///
/// struct Printer;
///
/// #[async_trait]
/// impl Handler<String> for Printer {
///     async fn handle(&self, msg: String, _ctx: &CancellationToken) -> Result<(), TaskError> {
///         println!("{msg}");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<M: Send + 'static>: Send + Sync + 'static {
    /// Processes one message. `ctx` fires when the owning supervisor shuts down.
    async fn handle(&self, msg: M, ctx: &CancellationToken) -> Result<(), TaskError>;
}
