//! # Tracked-task identity and result handle.
//!
//! Every operation started by the [`TaskSupervisor`](crate::TaskSupervisor)
//! gets a generated [`TaskId`] (the key of the tracked set) and returns a
//! [`TaskHandle`] that resolves to the operation's own outcome.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::TaskError;

/// Generated identifier of a tracked task, unique per supervisor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    /// Numeric value of the id.
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Awaitable outcome of one tracked operation.
///
/// Dropping the handle detaches from the result; the operation keeps running
/// and stays tracked by the supervisor.
///
/// Resolves to:
/// - `Ok(T)` when the operation succeeds
/// - the operation's own `Err(TaskError)` when it fails
/// - `Err(TaskError::Panicked)` when it panics
/// - `Err(TaskError::Canceled)` when it was aborted by a shutdown overrun
#[must_use = "dropping a TaskHandle detaches from the task's result"]
pub struct TaskHandle<T> {
    id: TaskId,
    name: Arc<str>,
    rx: oneshot::Receiver<Result<T, TaskError>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(id: TaskId, name: Arc<str>, rx: oneshot::Receiver<Result<T, TaskError>>) -> Self {
        Self { id, name, rx }
    }

    /// Id of the tracked task.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Name the task was started with.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // Sender dropped without a result: the task was aborted.
            Poll::Ready(Err(_)) => Poll::Ready(Err(TaskError::Canceled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}
