//! # TaskSupervisor: tracks every background operation under one cancellation scope.
//!
//! The [`TaskSupervisor`] owns a [`CancellationToken`], a concurrent set of
//! tracked tasks keyed by generated [`TaskId`]s, and the runtime events registry.
//! Mailbox drain loops, expiration sweeps and outbound sends all run through it.
//!
//! ## Key responsibilities
//! - start operations immediately under a child of the shared scope
//! - isolate failures: an operation's error or panic is logged, published as an
//!   [`Event`], handed to its own [`TaskHandle`], and never touches siblings
//! - reject new work once shutdown began ([`RuntimeError::SupervisorStopped`])
//! - drain on shutdown: cancel the scope, wait for every tracked task (bounded by
//!   [`Config::grace`]), abort stragglers, leave the tracked set empty
//!
//! ## High-level architecture
//! ```text
//! run(name, op)
//!   ├─► admission.read()  ── stopping? → Err(SupervisorStopped)
//!   ├─► tracked.insert(TaskId, {name})
//!   └─► tracker.spawn(catch_unwind(op(child_token)))
//!             └─► on exit: tracked.remove(id) → report failure → handle ◄─ result
//!
//! shutdown()
//!   ├─► admission.write() = stopped        (later run() calls are rejected)
//!   ├─► publish ShutdownRequested
//!   ├─► token.cancel()                     → propagates to child tokens
//!   └─► tracker.wait() within grace:
//!          ├─ Ok       → publish AllStoppedWithin
//!          └─ Timeout  → abort remaining → publish GraceExceeded → Err(GraceExceeded)
//!   └─► tracked.clear() → drained = true   (later callers wait for this)
//! ```
//!
//! ## Example
//! ```rust
//! use fleetvisor::{Config, TaskError, TaskSupervisor};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sup = TaskSupervisor::new(Config::default());
//!
//!     let answer = sup.run("answer", |_ctx| async { Ok::<_, TaskError>(42) })?;
//!     assert_eq!(answer.await?, 42);
//!
//!     sup.spawn("ticker", |ctx| async move {
//!         ctx.cancelled().await;
//!         Ok(())
//!     })?;
//!
//!     sup.shutdown().await?;
//!     assert_eq!(sup.tracked(), 0);
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::{oneshot, watch};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::handle::{TaskHandle, TaskId};
use crate::{
    config::Config,
    error::{panic_info, RuntimeError, TaskError},
    events::{Event, EventKind},
    subscribers::EventSubscribers,
};

/// Bookkeeping for one tracked task.
struct Tracked {
    name: Arc<str>,
    abort: Option<AbortHandle>,
}

/// Owns the cancellation scope and the set of tracked tasks.
pub struct TaskSupervisor {
    cfg: Config,
    token: CancellationToken,
    tracker: TaskTracker,
    tracked: Arc<DashMap<TaskId, Tracked>>,
    next_id: AtomicU64,
    /// `true` while accepting work. Readers are `run` calls, the single writer is `shutdown`.
    admission: RwLock<bool>,
    /// Set once the first `shutdown` emptied the tracked set.
    drained: watch::Sender<bool>,
    events: Arc<EventSubscribers<Event>>,
}

impl TaskSupervisor {
    /// Creates a supervisor with a fresh cancellation scope.
    pub fn new(cfg: Config) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            tracked: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            admission: RwLock::new(true),
            drained: watch::channel(false).0,
            events: Arc::new(EventSubscribers::named("fleetvisor.events")),
        })
    }

    /// Starts `op` immediately under a child of the supervisor's scope.
    ///
    /// The operation receives its [`CancellationToken`] and should return
    /// promptly once it fires. Its outcome is delivered to the returned handle;
    /// failures are additionally logged and published, but never propagated to
    /// the supervisor or to other tasks.
    ///
    /// # Errors
    /// [`RuntimeError::SupervisorStopped`] once shutdown has begun.
    pub fn run<F, Fut, T>(&self, name: impl Into<Arc<str>>, op: F) -> Result<TaskHandle<T>, RuntimeError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_stopping() {
            return Err(RuntimeError::SupervisorStopped);
        }
        let name: Arc<str> = name.into();
        let fut = op(self.token.child_token());

        // Held across insert+spawn so shutdown either sees this task or rejected it.
        let admission = self.admission.read();
        if !*admission {
            return Err(RuntimeError::SupervisorStopped);
        }

        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.tracked.insert(
            id,
            Tracked {
                name: Arc::clone(&name),
                abort: None,
            },
        );

        let (tx, rx) = oneshot::channel();
        let tracked = Arc::clone(&self.tracked);
        let events = Arc::clone(&self.events);
        let task_name = Arc::clone(&name);

        let join = self.tracker.spawn(async move {
            let outcome = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(res) => res,
                Err(payload) => Err(TaskError::Panicked {
                    info: panic_info(payload.as_ref()),
                }),
            };
            tracked.remove(&id);
            if let Err(err) = &outcome {
                report_failure(&events, &task_name, err);
            }
            let _ = tx.send(outcome);
        });

        if let Some(mut entry) = self.tracked.get_mut(&id) {
            entry.abort = Some(join.abort_handle());
        }
        drop(admission);

        Ok(TaskHandle::new(id, name, rx))
    }

    /// Fire-and-forget variant of [`run`](Self::run).
    ///
    /// # Errors
    /// [`RuntimeError::SupervisorStopped`] once shutdown has begun.
    pub fn spawn<F, Fut>(&self, name: impl Into<Arc<str>>, op: F) -> Result<TaskId, RuntimeError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.run(name, op).map(|handle| handle.id())
    }

    /// Cancels the scope and waits until every tracked task reached a terminal state.
    ///
    /// Idempotent and safe to call concurrently: every caller returns only after
    /// the drain completed. Individual task failures are never propagated.
    ///
    /// # Errors
    /// [`RuntimeError::GraceExceeded`] (first caller only) when some tasks ignored
    /// cancellation for longer than [`Config::grace`]; they were aborted and the
    /// tracked set is empty nonetheless.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let first = {
            let mut admission = self.admission.write();
            std::mem::replace(&mut *admission, false)
        };
        if !first {
            let mut drained = self.drained.subscribe();
            let _ = drained.wait_for(|done| *done).await;
            return Ok(());
        }

        tracing::info!(tracked = self.tracked.len(), "supervisor shutdown requested");
        self.events.publish(&Event::new(EventKind::ShutdownRequested));
        self.token.cancel();
        self.tracker.close();

        let result = match self.cfg.shutdown_grace() {
            None => {
                self.tracker.wait().await;
                Ok(())
            }
            Some(grace) => match tokio::time::timeout(grace, self.tracker.wait()).await {
                Ok(()) => Ok(()),
                Err(_elapsed) => {
                    let stuck = self.abort_remaining();
                    self.tracker.wait().await;
                    Err(RuntimeError::GraceExceeded { grace, stuck })
                }
            },
        };
        self.tracked.clear();
        self.drained.send_replace(true);

        match &result {
            Ok(()) => {
                tracing::info!("supervisor drained");
                self.events.publish(&Event::new(EventKind::AllStoppedWithin));
            }
            Err(RuntimeError::GraceExceeded { grace, stuck }) => {
                tracing::warn!(?grace, ?stuck, "shutdown grace exceeded; tasks aborted");
                self.events.publish(
                    &Event::new(EventKind::GraceExceeded)
                        .with_timeout(*grace)
                        .with_reason(stuck.join(",")),
                );
            }
            Err(_) => {}
        }
        result
    }

    /// Number of currently tracked tasks.
    pub fn tracked(&self) -> usize {
        self.tracked.len()
    }

    /// Sorted names of currently tracked tasks.
    pub fn tracked_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tracked
            .iter()
            .map(|entry| entry.value().name.to_string())
            .collect();
        names.sort_unstable();
        names
    }

    /// True once shutdown has begun.
    pub fn is_stopping(&self) -> bool {
        !*self.admission.read()
    }

    /// The shared cancellation scope (cancelled when shutdown begins).
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Runtime events registry; attach observers such as `LogWriter` here.
    pub fn events(&self) -> &Arc<EventSubscribers<Event>> {
        &self.events
    }

    /// Runtime configuration.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Aborts every task still tracked and returns their sorted names.
    fn abort_remaining(&self) -> Vec<String> {
        let mut stuck = Vec::new();
        for entry in self.tracked.iter() {
            if let Some(abort) = &entry.value().abort {
                abort.abort();
            }
            stuck.push(entry.value().name.to_string());
        }
        stuck.sort_unstable();
        stuck
    }
}

impl Drop for TaskSupervisor {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Logs and publishes a contained task failure.
fn report_failure(events: &EventSubscribers<Event>, task: &Arc<str>, err: &TaskError) {
    match err {
        TaskError::Canceled => {
            tracing::debug!(task = %task, "tracked task stopped on cancellation");
        }
        TaskError::Panicked { info } => {
            tracing::warn!(task = %task, info = %info, "tracked task panicked");
            events.publish(
                &Event::new(EventKind::TaskPanicked)
                    .with_source(Arc::clone(task))
                    .with_reason(info.as_str()),
            );
        }
        other => {
            tracing::warn!(task = %task, error = %other, label = other.as_label(), "tracked task failed");
            events.publish(
                &Event::new(EventKind::TaskFailed)
                    .with_source(Arc::clone(task))
                    .with_reason(other.to_string()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    use parking_lot::Mutex;

    fn supervisor() -> Arc<TaskSupervisor> {
        TaskSupervisor::new(Config::default())
    }

    fn record_events(sup: &TaskSupervisor) -> Arc<Mutex<Vec<EventKind>>> {
        let kinds = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&kinds);
        sup.events()
            .subscribe("test", move |e: &Event| sink.lock().push(e.kind));
        kinds
    }

    #[tokio::test]
    async fn run_returns_value_and_untracks() {
        let sup = supervisor();
        let handle = sup.run("answer", |_| async { Ok::<_, TaskError>(42) }).unwrap();
        assert_eq!(handle.name(), "answer");
        assert_eq!(handle.await, Ok(42));
        assert_eq!(sup.tracked(), 0);
    }

    #[tokio::test]
    async fn failure_is_isolated_and_shutdown_waits_for_sleeper() {
        let sup = supervisor();
        let events = record_events(&sup);
        let b_finished = Arc::new(AtomicBool::new(false));

        let a = sup
            .run("a", |_| async { Err::<(), _>(TaskError::fail("boom")) })
            .unwrap();
        let flag = Arc::clone(&b_finished);
        sup.spawn("b", move |ctx| async move {
            ctx.cancelled().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        assert_eq!(a.await, Err(TaskError::fail("boom")));
        assert_eq!(sup.tracked_names(), vec!["b".to_string()]);

        sup.shutdown().await.unwrap();
        assert!(b_finished.load(Ordering::SeqCst));
        assert_eq!(sup.tracked(), 0);
        assert_eq!(
            *events.lock(),
            vec![
                EventKind::TaskFailed,
                EventKind::ShutdownRequested,
                EventKind::AllStoppedWithin
            ]
        );
    }

    #[tokio::test]
    async fn panic_is_caught_and_reported() {
        let sup = supervisor();
        let events = record_events(&sup);
        let handle = sup
            .run("bad", |_| async {
                if true {
                    panic!("agent table corrupted");
                }
                Ok::<(), TaskError>(())
            })
            .unwrap();

        match handle.await {
            Err(TaskError::Panicked { info }) => assert_eq!(info, "agent table corrupted"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(*events.lock(), vec![EventKind::TaskPanicked]);
        assert_eq!(sup.tracked(), 0);
    }

    #[tokio::test]
    async fn run_after_shutdown_is_rejected() {
        let sup = supervisor();
        sup.shutdown().await.unwrap();
        assert!(sup.is_stopping());
        assert!(sup.token().is_cancelled());

        let err = sup.spawn("late", |_| async { Ok(()) }).unwrap_err();
        assert!(matches!(err, RuntimeError::SupervisorStopped));
        assert_eq!(sup.tracked(), 0);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_concurrent_safe() {
        let sup = supervisor();
        sup.spawn("loop", |ctx| async move {
            ctx.cancelled().await;
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(())
        })
        .unwrap();

        let (first, second) = tokio::join!(sup.shutdown(), sup.shutdown());
        assert!(first.is_ok());
        assert!(second.is_ok());
        assert_eq!(sup.tracked(), 0);
        assert!(sup.shutdown().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn stubborn_task_is_aborted_after_grace() {
        let cfg = Config {
            grace: Duration::from_millis(50),
            ..Config::default()
        };
        let sup = TaskSupervisor::new(cfg);
        let events = record_events(&sup);

        let stubborn = sup
            .run("stubborn", |_ctx| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok::<(), TaskError>(())
            })
            .unwrap();
        let polite = sup
            .run("polite", |ctx| async move {
                ctx.cancelled().await;
                Err::<(), _>(TaskError::Canceled)
            })
            .unwrap();

        match sup.shutdown().await {
            Err(RuntimeError::GraceExceeded { grace, stuck }) => {
                assert_eq!(grace, Duration::from_millis(50));
                assert_eq!(stuck, vec!["stubborn".to_string()]);
            }
            other => panic!("unexpected shutdown result: {other:?}"),
        }
        assert_eq!(sup.tracked(), 0);
        assert_eq!(stubborn.await, Err(TaskError::Canceled));
        assert_eq!(polite.await, Err(TaskError::Canceled));
        assert_eq!(
            *events.lock(),
            vec![EventKind::ShutdownRequested, EventKind::GraceExceeded]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_shutdowns_return_after_stubborn_task_is_cleared() {
        for _ in 0..50 {
            let cfg = Config {
                grace: Duration::from_millis(5),
                ..Config::default()
            };
            let sup = TaskSupervisor::new(cfg);
            sup.spawn("stubborn", |_ctx| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
            .unwrap();

            let callers: Vec<_> = (0..2)
                .map(|_| {
                    let sup = Arc::clone(&sup);
                    tokio::spawn(async move {
                        let res = sup.shutdown().await;
                        (res, sup.tracked())
                    })
                })
                .collect();

            let mut exceeded = 0;
            for caller in callers {
                let (res, left) = caller.await.unwrap();
                assert_eq!(left, 0, "shutdown returned with tasks still tracked");
                match res {
                    Ok(()) => {}
                    Err(RuntimeError::GraceExceeded { stuck, .. }) => {
                        assert_eq!(stuck, vec!["stubborn".to_string()]);
                        exceeded += 1;
                    }
                    Err(other) => panic!("unexpected shutdown result: {other}"),
                }
            }
            assert_eq!(exceeded, 1);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_runs_are_tracked_or_rejected() {
        let sup = supervisor();
        let accepted = Arc::new(AtomicU64::new(0));
        let finished = Arc::new(AtomicU64::new(0));

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let sup = Arc::clone(&sup);
                let accepted = Arc::clone(&accepted);
                let finished = Arc::clone(&finished);
                tokio::spawn(async move {
                    for _ in 0..200 {
                        let done = Arc::clone(&finished);
                        let res = sup.spawn("worker", move |ctx| async move {
                            ctx.cancelled().await;
                            done.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        });
                        match res {
                            Ok(_) => {
                                accepted.fetch_add(1, Ordering::SeqCst);
                            }
                            Err(RuntimeError::SupervisorStopped) => break,
                            Err(other) => panic!("unexpected error: {other}"),
                        }
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(5)).await;
        sup.shutdown().await.unwrap();
        for p in producers {
            p.await.unwrap();
        }

        assert_eq!(sup.tracked(), 0);
        assert_eq!(
            accepted.load(Ordering::SeqCst),
            finished.load(Ordering::SeqCst)
        );
    }
}
