//! # ReplyCorrelator: matches reply frames to the callers awaiting them.
//!
//! One correlator belongs to one logical connection. Each request gets the next
//! sequence number and a pending entry; the reply frame carrying that number
//! resolves exactly the caller that sent it.
//!
//! ```text
//! begin(req) ─► seq = next (skips 0 and still-pending values)
//!            ├─► pending.insert(seq, {oneshot tx, deadline})
//!            └─► outbound.send(Request{seq})          ──► PendingReply{seq}
//!
//! PendingReply::wait(cancel)
//!    ├─ reply arrives   ◄── complete(seq, bytes): pending.remove(seq) → tx.send(Ok)
//!    ├─ cancel fires    ──► remove own entry → RequestCanceled
//!    ├─ close_all(r)    ◄── drain every entry → ConnectionClosed{r}
//!    ├─ deadline passed ◄── expiry sweep → TimedOut
//!    └─ scope cancelled ◄── supervisor shutdown → ConnectionClosed{"supervisor shutdown"}
//! ```
//!
//! Removal from the pending table is the only completion point, so each
//! sequence number resolves at most once. A reply without an entry (duplicate,
//! late after cancellation, or never issued) is logged, published as
//! [`EventKind::ReplyUnmatched`] and otherwise ignored.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::codec::{Codec, JsonCodec};
use super::frame::{Frame, Outbound};
use crate::{
    core::{TaskId, TaskSupervisor},
    error::{ReplyError, RuntimeError},
    events::{Event, EventKind},
    mailbox::Prioritized,
    subscribers::EventSubscribers,
};

type ReplySender = oneshot::Sender<Result<Vec<u8>, ReplyError>>;
type ReplyReceiver = oneshot::Receiver<Result<Vec<u8>, ReplyError>>;
type PendingTable = Arc<DashMap<u32, Pending>>;

/// Teardown reason used when the supervisor's scope ends.
const SHUTDOWN_REASON: &str = "supervisor shutdown";

struct Pending {
    tx: ReplySender,
    /// Deadline and the timeout it was derived from.
    deadline: Option<(Instant, Duration)>,
}

/// Request/reply correlation for one connection.
pub struct ReplyCorrelator<C: Codec = JsonCodec> {
    name: Arc<str>,
    codec: C,
    outbound: Arc<dyn Outbound>,
    events: Arc<EventSubscribers<Event>>,
    reply_timeout: Option<Duration>,
    expiry_interval: Duration,
    next_seq: AtomicU32,
    wrapped: AtomicBool,
    pending: PendingTable,
    closed: RwLock<Option<Arc<str>>>,
    /// Supervisor scope; its cancellation tears the connection down.
    scope: CancellationToken,
}

impl ReplyCorrelator<JsonCodec> {
    /// Creates a JSON correlator; timeouts come from the supervisor's config and
    /// anomalies are published on its events registry.
    pub fn new(name: impl Into<Arc<str>>, outbound: Arc<dyn Outbound>, supervisor: &TaskSupervisor) -> Self {
        Self::with_codec(name, outbound, supervisor, JsonCodec)
    }
}

impl<C: Codec> ReplyCorrelator<C> {
    /// Creates a correlator with a custom payload codec.
    pub fn with_codec(
        name: impl Into<Arc<str>>,
        outbound: Arc<dyn Outbound>,
        supervisor: &TaskSupervisor,
        codec: C,
    ) -> Self {
        let cfg = supervisor.config();
        Self {
            name: name.into(),
            codec,
            outbound,
            events: Arc::clone(supervisor.events()),
            reply_timeout: cfg.default_reply_timeout(),
            expiry_interval: cfg.expiry_interval_clamped(),
            next_seq: AtomicU32::new(1),
            wrapped: AtomicBool::new(false),
            pending: Arc::new(DashMap::new()),
            closed: RwLock::new(None),
            scope: supervisor.token().clone(),
        }
    }

    /// Connection name used in logs and events.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Payload codec.
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Sends `request` and waits for its reply or for `cancel`.
    ///
    /// # Errors
    /// See [`begin`](Self::begin) and [`PendingReply::wait`].
    pub async fn send<Req, R>(&self, request: &Req, cancel: &CancellationToken) -> Result<R, ReplyError>
    where
        Req: Serialize + Prioritized + Sync + ?Sized,
        R: DeserializeOwned,
    {
        self.begin(request).await?.wait(cancel).await
    }

    /// Registers a pending entry with the default deadline and transmits `request`.
    ///
    /// # Errors
    /// - [`ReplyError::ConnectionClosed`] if the connection was torn down or the
    ///   supervisor is shutting down
    /// - [`ReplyError::Codec`] if the request cannot be encoded
    /// - [`ReplyError::Transport`] if the transport refused the frame
    pub async fn begin<Req, R>(&self, request: &Req) -> Result<PendingReply<R, C>, ReplyError>
    where
        Req: Serialize + Prioritized + Sync + ?Sized,
        R: DeserializeOwned,
    {
        self.begin_with_timeout(request, self.reply_timeout).await
    }

    /// Like [`begin`](Self::begin) with an explicit deadline (`None` waits until
    /// a reply, cancellation or teardown).
    ///
    /// # Errors
    /// See [`begin`](Self::begin).
    pub async fn begin_with_timeout<Req, R>(
        &self,
        request: &Req,
        timeout: Option<Duration>,
    ) -> Result<PendingReply<R, C>, ReplyError>
    where
        Req: Serialize + Prioritized + Sync + ?Sized,
        R: DeserializeOwned,
    {
        self.ensure_open()?;
        let priority = request.priority();
        let payload = self.codec.encode(request)?;

        let (tx, rx) = oneshot::channel();
        let deadline = timeout.map(|t| (Instant::now() + t, t));
        let seq = self.register(Pending { tx, deadline });
        let pending = PendingReply {
            seq,
            rx: Some(rx),
            table: Arc::clone(&self.pending),
            scope: self.scope.clone(),
            codec: self.codec.clone(),
            _reply: PhantomData,
        };

        // close_all may have drained the table before our insert.
        self.ensure_open()?;

        if let Err(err) = self.outbound.send(Frame::request(seq, priority, payload)).await {
            tracing::warn!(conn = %self.name, seq, error = %err, "request not transmitted");
            return Err(err);
        }
        tracing::trace!(conn = %self.name, seq, "request sent");
        Ok(pending)
    }

    /// Resolves the caller waiting on `seq` with `payload`.
    ///
    /// Returns `false` when no entry matched; the reply is then logged as
    /// `stale` (issued here, already resolved or abandoned) or `unknown` (never
    /// issued on this connection) and dropped. Never fails.
    pub fn complete(&self, seq: u32, payload: Vec<u8>) -> bool {
        match self.pending.remove(&seq) {
            Some((_, entry)) => {
                if entry.tx.send(Ok(payload)).is_err() {
                    tracing::debug!(conn = %self.name, seq, "reply arrived as the caller left");
                }
                true
            }
            None => {
                let kind = if self.was_issued(seq) { "stale" } else { "unknown" };
                tracing::warn!(conn = %self.name, seq, kind, "unmatched reply dropped");
                self.events.publish(
                    &Event::new(EventKind::ReplyUnmatched)
                        .with_source(Arc::clone(&self.name))
                        .with_reply_seq(seq)
                        .with_reason(kind),
                );
                false
            }
        }
    }

    /// Fails every pending entry with [`ReplyError::ConnectionClosed`] and
    /// refuses later requests. Returns the number of failed entries.
    ///
    /// Idempotent; the first reason is kept.
    pub fn close_all(&self, reason: impl Into<Arc<str>>) -> usize {
        let (reason, first) = {
            let mut closed = self.closed.write();
            match &*closed {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let reason = reason.into();
                    *closed = Some(Arc::clone(&reason));
                    (reason, true)
                }
            }
        };

        let seqs: Vec<u32> = self.pending.iter().map(|e| *e.key()).collect();
        let mut failed = 0;
        for seq in seqs {
            if let Some((_, entry)) = self.pending.remove(&seq) {
                let _ = entry.tx.send(Err(ReplyError::ConnectionClosed {
                    reason: reason.to_string(),
                }));
                failed += 1;
            }
        }

        if first {
            tracing::info!(conn = %self.name, reason = %reason, failed, "connection closed");
            self.events.publish(
                &Event::new(EventKind::ConnectionClosed)
                    .with_source(Arc::clone(&self.name))
                    .with_reason(reason),
            );
        }
        failed
    }

    /// True after [`close_all`](Self::close_all).
    pub fn is_closed(&self) -> bool {
        self.closed.read().is_some()
    }

    /// Teardown reason, if closed.
    pub fn close_reason(&self) -> Option<Arc<str>> {
        self.closed.read().clone()
    }

    /// Number of outstanding requests.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Fails every entry whose deadline has passed with [`ReplyError::TimedOut`].
    /// Returns the number of expired entries.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let due = |entry: &Pending| entry.deadline.is_some_and(|(at, _)| at <= now);
        let expired: Vec<u32> = self
            .pending
            .iter()
            .filter(|e| due(e.value()))
            .map(|e| *e.key())
            .collect();

        let mut count = 0;
        for seq in expired {
            let Some((_, entry)) = self.pending.remove_if(&seq, |_, e| due(e)) else {
                continue;
            };
            let after = entry.deadline.map(|(_, t)| t).unwrap_or_default();
            let _ = entry.tx.send(Err(ReplyError::TimedOut { after }));
            count += 1;
            tracing::warn!(conn = %self.name, seq, ?after, "reply timed out");
            self.events.publish(
                &Event::new(EventKind::ReplyTimedOut)
                    .with_source(Arc::clone(&self.name))
                    .with_reply_seq(seq)
                    .with_timeout(after),
            );
        }
        count
    }

    /// Runs [`sweep_expired`](Self::sweep_expired) periodically as a tracked task.
    ///
    /// On supervisor shutdown the sweep closes the correlator, failing every
    /// pending request with [`ReplyError::ConnectionClosed`]. It also stops on
    /// connection teardown or once the correlator is dropped.
    ///
    /// # Errors
    /// [`RuntimeError::SupervisorStopped`] if the supervisor is shutting down.
    pub fn start_expiry(self: &Arc<Self>, supervisor: &TaskSupervisor) -> Result<TaskId, RuntimeError> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.expiry_interval;
        supervisor.spawn(format!("expiry:{}", self.name), move |ctx| async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                let stopping = tokio::select! {
                    () = ctx.cancelled() => true,
                    _ = tick.tick() => false,
                };
                let Some(this) = weak.upgrade() else {
                    return Ok(());
                };
                if stopping {
                    this.close_all(SHUTDOWN_REASON);
                    return Ok(());
                }
                if this.is_closed() {
                    return Ok(());
                }
                this.sweep_expired();
            }
        })
    }

    fn ensure_open(&self) -> Result<(), ReplyError> {
        if self.scope.is_cancelled() {
            self.close_all(SHUTDOWN_REASON);
        }
        match self.close_reason() {
            Some(reason) => Err(ReplyError::ConnectionClosed {
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Inserts `entry` under the next free sequence number.
    fn register(&self, entry: Pending) -> u32 {
        loop {
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            if seq == 0 {
                self.wrapped.store(true, Ordering::Relaxed);
                continue;
            }
            match self.pending.entry(seq) {
                Entry::Vacant(slot) => {
                    slot.insert(entry);
                    return seq;
                }
                // still pending from before the counter wrapped
                Entry::Occupied(_) => continue,
            }
        }
    }

    fn was_issued(&self, seq: u32) -> bool {
        seq != 0 && (self.wrapped.load(Ordering::Relaxed) || seq < self.next_seq.load(Ordering::Relaxed))
    }
}

impl<C: Codec> fmt::Debug for ReplyCorrelator<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyCorrelator")
            .field("name", &self.name)
            .field("pending", &self.pending.len())
            .field("closed", &self.close_reason())
            .finish()
    }
}

/// A transmitted request awaiting its reply.
///
/// Dropping it without waiting abandons the request: the entry is removed and
/// a late reply is reported as unmatched.
#[must_use = "dropping a PendingReply abandons the request"]
pub struct PendingReply<R, C: Codec = JsonCodec> {
    seq: u32,
    rx: Option<ReplyReceiver>,
    table: PendingTable,
    scope: CancellationToken,
    codec: C,
    _reply: PhantomData<fn() -> R>,
}

impl<R: DeserializeOwned, C: Codec> PendingReply<R, C> {
    /// Sequence number the request was sent with.
    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// Waits for the reply, or until `cancel` fires.
    ///
    /// # Errors
    /// - [`ReplyError::RequestCanceled`] when `cancel` fired first (the entry is removed)
    /// - [`ReplyError::ConnectionClosed`] on teardown or supervisor shutdown
    /// - [`ReplyError::TimedOut`] when the expiry sweep failed the entry
    /// - [`ReplyError::Codec`] when the reply payload cannot be decoded
    pub async fn wait(mut self, cancel: &CancellationToken) -> Result<R, ReplyError> {
        let woken = match self.rx.as_mut() {
            Some(rx) => tokio::select! {
                biased;
                res = rx => Ok(res),
                () = cancel.cancelled() => Err(ReplyError::RequestCanceled),
                () = self.scope.cancelled() => Err(ReplyError::ConnectionClosed {
                    reason: SHUTDOWN_REASON.into(),
                }),
            },
            None => Err(ReplyError::RequestCanceled),
        };

        let outcome = match woken {
            Ok(outcome) => outcome,
            Err(err) => {
                self.release();
                return Err(err);
            }
        };
        self.rx = None;
        match outcome {
            Ok(Ok(bytes)) => Ok(self.codec.decode(&bytes)?),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ReplyError::ConnectionClosed {
                reason: "correlator dropped".into(),
            }),
        }
    }
}

impl<R, C: Codec> PendingReply<R, C> {
    /// Removes this request's entry unless it already completed.
    fn release(&mut self) {
        if let Some(rx) = self.rx.take() {
            drop(rx);
            // A closed sender identifies our entry even if the number was reissued.
            self.table.remove_if(&self.seq, |_, entry| entry.tx.is_closed());
        }
    }
}

impl<R, C: Codec> Drop for PendingReply<R, C> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<R, C: Codec> fmt::Debug for PendingReply<R, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingReply").field("seq", &self.seq).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde::Deserialize;
    use tokio::sync::mpsc;

    use crate::config::Config;
    use crate::rpc::FrameKind;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Ping(u32);
    impl Prioritized for Ping {}

    struct Fixture {
        sup: Arc<TaskSupervisor>,
        corr: Arc<ReplyCorrelator>,
        wire: mpsc::UnboundedReceiver<Frame>,
        events: Arc<Mutex<Vec<Event>>>,
    }

    fn fixture(cfg: Config) -> Fixture {
        let sup = TaskSupervisor::new(cfg);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        sup.events().subscribe("test", move |e: &Event| sink.lock().push(e.clone()));
        let (tx, wire) = mpsc::unbounded_channel::<Frame>();
        let corr = Arc::new(ReplyCorrelator::new("agent-1", Arc::new(tx), &sup));
        Fixture {
            sup,
            corr,
            wire,
            events,
        }
    }

    fn kinds(events: &Mutex<Vec<Event>>) -> Vec<EventKind> {
        events.lock().iter().map(|e| e.kind).collect()
    }

    #[tokio::test]
    async fn first_request_gets_seq_one_and_teardown_fails_it() {
        let mut fx = fixture(Config::default());
        let pending = fx.corr.begin::<_, u32>(&Ping(1)).await.unwrap();
        assert_eq!(pending.seq(), 1);

        let frame = fx.wire.recv().await.unwrap();
        assert_eq!((frame.seq, frame.kind), (1, FrameKind::Request));

        assert_eq!(fx.corr.close_all("connection reset"), 1);
        match pending.wait(&CancellationToken::new()).await {
            Err(ReplyError::ConnectionClosed { reason }) => assert_eq!(reason, "connection reset"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(fx.corr.pending(), 0);
        assert_eq!(kinds(&fx.events), vec![EventKind::ConnectionClosed]);
    }

    #[tokio::test]
    async fn reply_resolves_once_and_duplicate_is_stale() {
        let fx = fixture(Config::default());
        let pending = fx.corr.begin::<_, u32>(&Ping(5)).await.unwrap();
        let seq = pending.seq();

        assert!(fx.corr.complete(seq, b"42".to_vec()));
        assert!(!fx.corr.complete(seq, b"43".to_vec()));
        assert_eq!(pending.wait(&CancellationToken::new()).await.unwrap(), 42);

        let events = fx.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::ReplyUnmatched);
        assert_eq!(events[0].reply_seq, Some(seq));
        assert_eq!(events[0].reason.as_deref(), Some("stale"));
    }

    #[tokio::test]
    async fn never_issued_seq_is_unknown() {
        let fx = fixture(Config::default());
        assert!(!fx.corr.complete(900, Vec::new()));
        assert!(!fx.corr.complete(0, Vec::new()));
        let reasons: Vec<_> = fx
            .events
            .lock()
            .iter()
            .map(|e| e.reason.as_deref().unwrap_or_default().to_string())
            .collect();
        assert_eq!(reasons, vec!["unknown", "unknown"]);
    }

    #[tokio::test]
    async fn cancellation_removes_entry_and_late_reply_is_discarded() {
        let fx = fixture(Config::default());
        let cancel = CancellationToken::new();
        let pending = fx.corr.begin::<_, u32>(&Ping(1)).await.unwrap();
        let seq = pending.seq();

        cancel.cancel();
        assert!(matches!(
            pending.wait(&cancel).await,
            Err(ReplyError::RequestCanceled)
        ));
        assert_eq!(fx.corr.pending(), 0);
        assert!(!fx.corr.complete(seq, b"1".to_vec()));
    }

    #[tokio::test]
    async fn dropping_pending_reply_unregisters_it() {
        let fx = fixture(Config::default());
        let pending = fx.corr.begin::<_, u32>(&Ping(1)).await.unwrap();
        assert_eq!(fx.corr.pending(), 1);
        drop(pending);
        assert_eq!(fx.corr.pending(), 0);
    }

    #[tokio::test]
    async fn requests_after_teardown_are_refused() {
        let fx = fixture(Config::default());
        fx.corr.close_all("agent left");
        assert_eq!(fx.corr.close_all("again"), 0);
        assert_eq!(fx.corr.close_reason().as_deref(), Some("agent left"));

        let err = fx.corr.begin::<_, u32>(&Ping(1)).await.unwrap_err();
        assert!(matches!(err, ReplyError::ConnectionClosed { .. }));
        assert_eq!(kinds(&fx.events), vec![EventKind::ConnectionClosed]);
    }

    #[tokio::test]
    async fn transport_failure_leaves_no_entry() {
        let fx = fixture(Config::default());
        drop(fx.wire);
        let err = fx.corr.begin::<_, u32>(&Ping(1)).await.unwrap_err();
        assert!(matches!(err, ReplyError::Transport(_)));
        assert_eq!(fx.corr.pending(), 0);
    }

    #[tokio::test]
    async fn wrapped_counter_skips_zero_and_pending_numbers() {
        let fx = fixture(Config::default());
        let first = fx.corr.begin::<_, u32>(&Ping(1)).await.unwrap();
        assert_eq!(first.seq(), 1);

        fx.corr.next_seq.store(u32::MAX, Ordering::Relaxed);
        let last = fx.corr.begin::<_, u32>(&Ping(2)).await.unwrap();
        assert_eq!(last.seq(), u32::MAX);
        let next = fx.corr.begin::<_, u32>(&Ping(3)).await.unwrap();
        assert_eq!(next.seq(), 2);
        assert_eq!(fx.corr.pending(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_sweep_fails_overdue_requests() {
        let cfg = Config {
            expiry_interval: Duration::from_millis(20),
            ..Config::default()
        };
        let fx = fixture(cfg);
        fx.corr.start_expiry(&fx.sup).unwrap();

        let slow = fx
            .corr
            .begin_with_timeout::<_, u32>(&Ping(1), Some(Duration::from_millis(100)))
            .await
            .unwrap();
        let patient = fx
            .corr
            .begin_with_timeout::<_, u32>(&Ping(2), None)
            .await
            .unwrap();

        match slow.wait(&CancellationToken::new()).await {
            Err(ReplyError::TimedOut { after }) => assert_eq!(after, Duration::from_millis(100)),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(fx.corr.pending(), 1);
        assert!(fx.corr.complete(patient.seq(), b"7".to_vec()));
        assert_eq!(patient.wait(&CancellationToken::new()).await.unwrap(), 7);

        let timed_out: Vec<_> = fx
            .events
            .lock()
            .iter()
            .filter(|e| e.kind == EventKind::ReplyTimedOut)
            .map(|e| (e.reply_seq, e.timeout_ms))
            .collect();
        assert_eq!(timed_out, vec![(Some(1), Some(100))]);
        fx.sup.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn supervisor_shutdown_fails_pending_requests() {
        let cfg = Config {
            reply_timeout: Duration::from_millis(100),
            expiry_interval: Duration::from_millis(10),
            ..Config::default()
        };
        let fx = fixture(cfg);
        fx.corr.start_expiry(&fx.sup).unwrap();
        let pending = fx.corr.begin::<_, u32>(&Ping(1)).await.unwrap();

        fx.sup.shutdown().await.unwrap();
        let outcome = tokio::time::timeout(
            Duration::from_secs(3600),
            pending.wait(&CancellationToken::new()),
        )
        .await
        .expect("pending request must resolve after shutdown");
        match outcome {
            Err(ReplyError::ConnectionClosed { reason }) => assert_eq!(reason, "supervisor shutdown"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(fx.corr.pending(), 0);
        assert!(fx.corr.is_closed());
        assert!(kinds(&fx.events).contains(&EventKind::ConnectionClosed));

        let err = fx.corr.begin::<_, u32>(&Ping(2)).await.unwrap_err();
        assert!(matches!(err, ReplyError::ConnectionClosed { .. }));
    }

    #[tokio::test]
    async fn waiter_without_sweep_resolves_on_shutdown() {
        let fx = fixture(Config::default());
        let pending = fx
            .corr
            .begin_with_timeout::<_, u32>(&Ping(1), None)
            .await
            .unwrap();

        fx.sup.shutdown().await.unwrap();
        assert!(matches!(
            pending.wait(&CancellationToken::new()).await,
            Err(ReplyError::ConnectionClosed { .. })
        ));
        assert_eq!(fx.corr.pending(), 0);

        let err = fx.corr.begin::<_, u32>(&Ping(2)).await.unwrap_err();
        assert!(matches!(err, ReplyError::ConnectionClosed { reason } if reason == "supervisor shutdown"));
        assert_eq!(fx.corr.close_reason().as_deref(), Some("supervisor shutdown"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_each_get_their_own_reply() {
        let Fixture {
            sup, corr, mut wire, ..
        } = fixture(Config::default());

        let responder = {
            let corr = Arc::clone(&corr);
            tokio::spawn(async move {
                while let Some(frame) = wire.recv().await {
                    // Ping(n) encodes as n; answer with the same payload
                    corr.complete(frame.seq, frame.payload);
                }
            })
        };

        let callers: Vec<_> = (0..64u32)
            .map(|n| {
                let corr = Arc::clone(&corr);
                tokio::spawn(async move {
                    let got: u32 = corr.send(&Ping(n), &CancellationToken::new()).await.unwrap();
                    assert_eq!(got, n);
                })
            })
            .collect();
        for c in callers {
            c.await.unwrap();
        }

        assert_eq!(corr.pending(), 0);
        drop(corr);
        sup.shutdown().await.unwrap();
        responder.abort();
    }
}
