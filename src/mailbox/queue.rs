//! # Mailbox: two-tier queue drained by one worker at a time.
//!
//! ```text
//! producers (any thread)             drain loop (one tracked task while Processing)
//!   enqueue(msg) ──► lock ──┐          loop {
//!      jump_ahead ─► jump   │            lock: jump.pop() or normal.pop()
//!      normal     ─► normal │              └─ both empty → Idle, notify, exit
//!      Idle? → Processing ──┴─► run ──►  handler.handle(msg)   (no lock held)
//!                                          └─ Err / panic → warn!, HandlerFailed, continue
//!                                      }
//! ```
//!
//! Both tiers sit behind a single lock so the drain loop always decides on a
//! consistent view. Starvation of the normal tier under sustained jump-ahead
//! traffic is accepted.

use std::collections::VecDeque;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::{Handler, Prioritized, Priority};
use crate::{
    core::TaskSupervisor,
    error::{panic_info, RuntimeError, TaskError},
    events::{Event, EventKind},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Processing,
}

struct Queues<M> {
    jump: VecDeque<M>,
    normal: VecDeque<M>,
    state: State,
}

impl<M> Queues<M> {
    fn pop(&mut self) -> Option<M> {
        match self.jump.pop_front() {
            Some(msg) => Some(msg),
            None => self.normal.pop_front(),
        }
    }
}

struct Inner<M: Send + 'static> {
    name: Arc<str>,
    queues: Mutex<Queues<M>>,
    handler: Arc<dyn Handler<M>>,
    supervisor: Arc<TaskSupervisor>,
    idle: Notify,
}

/// Per-entity mailbox giving its [`Handler`] single-threaded semantics.
///
/// Cloning is cheap and yields another producer for the same mailbox.
///
/// # Example
/// ```rust
/// use async_trait::async_trait;
/// use tokio_util::sync::CancellationToken;
/// use fleetvisor::{Config, Handler, Mailbox, Prioritized, TaskError, TaskSupervisor};
///
/// struct Line(String);
/// impl Prioritized for Line {}
///
/// struct Sink;
///
/// #[async_trait]
/// impl Handler<Line> for Sink {
///     async fn handle(&self, msg: Line, _ctx: &CancellationToken) -> Result<(), TaskError> {
///         println!("{}", msg.0);
///         Ok(())
///     }
/// }
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let sup = TaskSupervisor::new(Config::default());
///     let mailbox = Mailbox::new("agent-1", Sink, &sup);
///     mailbox.enqueue(Line("hello".into()))?;
///     mailbox.wait_idle().await;
///     sup.shutdown().await?;
///     Ok(())
/// }
/// ```
pub struct Mailbox<M: Send + 'static> {
    inner: Arc<Inner<M>>,
}

impl<M> Mailbox<M>
where
    M: Prioritized + Send + 'static,
{
    /// Creates an idle mailbox whose drain loops run under `supervisor`.
    pub fn new<H>(name: impl Into<Arc<str>>, handler: H, supervisor: &Arc<TaskSupervisor>) -> Self
    where
        H: Handler<M>,
    {
        Self::with_handler(name, Arc::new(handler), supervisor)
    }

    /// Like [`new`](Self::new) for a handler that is already shared.
    pub fn with_handler(
        name: impl Into<Arc<str>>,
        handler: Arc<dyn Handler<M>>,
        supervisor: &Arc<TaskSupervisor>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                queues: Mutex::new(Queues {
                    jump: VecDeque::new(),
                    normal: VecDeque::new(),
                    state: State::Idle,
                }),
                handler,
                supervisor: Arc::clone(supervisor),
                idle: Notify::new(),
            }),
        }
    }

    /// Queues `msg` in the tier its type declares and returns immediately.
    ///
    /// Starts a drain loop when the mailbox was idle.
    ///
    /// # Errors
    /// [`RuntimeError::SupervisorStopped`] when a drain loop had to be started
    /// but the supervisor is shutting down. The message stays queued.
    pub fn enqueue(&self, msg: M) -> Result<(), RuntimeError> {
        let start = {
            let mut q = self.inner.queues.lock();
            match msg.priority() {
                Priority::JumpAhead => q.jump.push_back(msg),
                Priority::Normal => q.normal.push_back(msg),
            }
            if q.state == State::Idle {
                q.state = State::Processing;
                true
            } else {
                false
            }
        };
        if start {
            self.schedule()
        } else {
            Ok(())
        }
    }

    /// Number of queued (not yet dequeued) messages across both tiers.
    pub fn len(&self) -> usize {
        let q = self.inner.queues.lock();
        q.jump.len() + q.normal.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when no drain loop is running.
    ///
    /// A mailbox whose loop stopped on shutdown is idle even if messages remain queued.
    pub fn is_idle(&self) -> bool {
        self.inner.queues.lock().state == State::Idle
    }

    /// Waits until the mailbox is idle.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Mailbox name, used in logs and events.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn schedule(&self) -> Result<(), RuntimeError> {
        let inner = Arc::clone(&self.inner);
        let task = format!("mailbox:{}", self.inner.name);
        match self
            .inner
            .supervisor
            .spawn(task, move |ctx| async move { inner.drain(ctx).await })
        {
            Ok(_) => Ok(()),
            Err(err) => {
                tracing::debug!(mailbox = %self.inner.name, "drain not started: supervisor stopped");
                self.inner.park();
                Err(err)
            }
        }
    }
}

impl<M: Send + 'static> Inner<M> {
    async fn drain(self: Arc<Self>, ctx: CancellationToken) -> Result<(), TaskError> {
        loop {
            if ctx.is_cancelled() {
                self.park();
                return Err(TaskError::Canceled);
            }
            let next = {
                let mut q = self.queues.lock();
                let next = q.pop();
                if next.is_none() {
                    q.state = State::Idle;
                }
                next
            };
            match next {
                Some(msg) => self.process(msg, &ctx).await,
                None => {
                    self.idle.notify_waiters();
                    return Ok(());
                }
            }
        }
    }

    async fn process(&self, msg: M, ctx: &CancellationToken) {
        let err = match AssertUnwindSafe(self.handler.handle(msg, ctx))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => return,
            Ok(Err(TaskError::Canceled)) => {
                tracing::debug!(mailbox = %self.name, "handler stopped on cancellation");
                return;
            }
            Ok(Err(err)) => err,
            Err(payload) => TaskError::Panicked {
                info: panic_info(payload.as_ref()),
            },
        };
        tracing::warn!(mailbox = %self.name, error = %err, label = err.as_label(), "handler failed; continuing");
        self.supervisor.events().publish(
            &Event::new(EventKind::HandlerFailed)
                .with_source(Arc::clone(&self.name))
                .with_reason(err.to_string()),
        );
    }

    /// Returns to Idle without draining and wakes `wait_idle` callers.
    fn park(&self) {
        self.queues.lock().state = State::Idle;
        self.idle.notify_waiters();
    }
}

impl<M: Send + 'static> Clone for Mailbox<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: Send + 'static> fmt::Debug for Mailbox<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let q = self.inner.queues.lock();
        f.debug_struct("Mailbox")
            .field("name", &self.inner.name)
            .field("jump", &q.jump.len())
            .field("normal", &q.normal.len())
            .field("state", &q.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::config::Config;

    #[derive(Debug, Clone)]
    enum Msg {
        Normal(&'static str),
        Jump(&'static str),
    }

    impl Msg {
        fn label(&self) -> &'static str {
            match self {
                Msg::Normal(l) | Msg::Jump(l) => l,
            }
        }
    }

    impl Prioritized for Msg {
        fn priority(&self) -> Priority {
            match self {
                Msg::Normal(_) => Priority::Normal,
                Msg::Jump(_) => Priority::JumpAhead,
            }
        }
    }

    /// Records labels; `block` waits for `gate`, `fail` errors, `panic` panics.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<&'static str>>,
        gate: Notify,
        in_flight: AtomicUsize,
        overlaps: AtomicUsize,
    }

    #[async_trait]
    impl Handler<Msg> for Arc<Recorder> {
        async fn handle(&self, msg: Msg, _ctx: &CancellationToken) -> Result<(), TaskError> {
            if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            let label = msg.label();
            match label {
                "block" => self.gate.notified().await,
                "yield" => tokio::task::yield_now().await,
                _ => {}
            }
            self.seen.lock().push(label);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            match label {
                "fail" => Err(TaskError::fail("unknown instance")),
                "panic" => panic!("handler exploded"),
                _ => Ok(()),
            }
        }
    }

    fn setup() -> (Arc<TaskSupervisor>, Arc<Recorder>, Mailbox<Msg>) {
        let sup = TaskSupervisor::new(Config::default());
        let rec = Arc::new(Recorder::default());
        let mailbox = Mailbox::new("agent-1", Arc::clone(&rec), &sup);
        (sup, rec, mailbox)
    }

    #[tokio::test]
    async fn jump_ahead_overtakes_queued_normals() {
        let (sup, rec, mailbox) = setup();

        mailbox.enqueue(Msg::Normal("M1")).unwrap();
        mailbox.enqueue(Msg::Jump("J1")).unwrap();
        mailbox.enqueue(Msg::Normal("M2")).unwrap();
        assert_eq!(mailbox.len(), 3);

        mailbox.wait_idle().await;
        assert_eq!(*rec.seen.lock(), vec!["J1", "M1", "M2"]);
        assert!(mailbox.is_empty());
        sup.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn in_progress_message_is_not_preempted() {
        let (sup, rec, mailbox) = setup();

        mailbox.enqueue(Msg::Normal("block")).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!mailbox.is_idle());

        mailbox.enqueue(Msg::Normal("N1")).unwrap();
        mailbox.enqueue(Msg::Jump("J1")).unwrap();
        mailbox.enqueue(Msg::Normal("N2")).unwrap();
        mailbox.enqueue(Msg::Jump("J2")).unwrap();
        rec.gate.notify_one();

        mailbox.wait_idle().await;
        assert_eq!(*rec.seen.lock(), vec!["block", "J1", "J2", "N1", "N2"]);
        sup.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn handler_failure_and_panic_do_not_stop_the_loop() {
        let (sup, rec, mailbox) = setup();
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&failures);
        sup.events().subscribe("test", move |e: &Event| {
            if e.kind == EventKind::HandlerFailed {
                sink.lock().push(e.reason.as_deref().unwrap_or_default().to_string());
            }
        });

        mailbox.enqueue(Msg::Normal("fail")).unwrap();
        mailbox.enqueue(Msg::Normal("panic")).unwrap();
        mailbox.enqueue(Msg::Normal("after")).unwrap();
        mailbox.wait_idle().await;

        assert_eq!(*rec.seen.lock(), vec!["fail", "panic", "after"]);
        assert_eq!(
            *failures.lock(),
            vec![
                "execution failed: unknown instance".to_string(),
                "panicked: handler exploded".to_string()
            ]
        );
        sup.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn enqueue_after_shutdown_keeps_message_and_errors() {
        let (sup, rec, mailbox) = setup();
        sup.shutdown().await.unwrap();

        let err = mailbox.enqueue(Msg::Jump("late")).unwrap_err();
        assert!(matches!(err, RuntimeError::SupervisorStopped));
        assert_eq!(mailbox.len(), 1);
        assert!(mailbox.is_idle());
        assert!(rec.seen.lock().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_producers_are_serialized() {
        let (sup, rec, mailbox) = setup();

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let mailbox = mailbox.clone();
                tokio::spawn(async move {
                    for i in 0..100 {
                        let msg = if i % 10 == 0 {
                            Msg::Jump("yield")
                        } else {
                            Msg::Normal("yield")
                        };
                        mailbox.enqueue(msg).unwrap();
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for p in producers {
            p.await.unwrap();
        }

        mailbox.wait_idle().await;
        assert!(mailbox.is_empty());
        assert_eq!(rec.seen.lock().len(), 400);
        assert_eq!(rec.overlaps.load(Ordering::SeqCst), 0);
        sup.shutdown().await.unwrap();
    }
}
