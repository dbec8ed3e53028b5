//! # ObservableState: a state cell that replays and broadcasts every change.
//!
//! One owner holds the canonical value; any number of subscribers receive the
//! current snapshot immediately on subscription and then every later change,
//! exactly once each.
//!
//! ## Architecture
//! ```text
//!  set(v) / update(f) ──► gate.lock()
//!                           ├─► value.store(Arc<T>)        (ArcSwap, lock-free readers)
//!                           └─► dispatch(Publish(v))       (synchronous fan-out)
//!
//!  subscribe(owner, cb) ─► gate.lock()
//!                           └─► dispatch(Subscribe)        (register, then replay)
//!
//!  dispatch(op) while another dispatch runs on this thread
//!                       ──► queued, run after the current fan-out in call order
//!
//!  get() ──► value.load_full()                              (never takes the gate)
//! ```
//!
//! ## Rules
//! - Publication and subscription are serialized by one gate, so a subscriber
//!   registering while a change is being published sees either the old value
//!   (replay) followed by the new one, or only the new one as its replay; never
//!   a duplicate and never a gap.
//! - Callbacks may call any method on the same cell. `set`, `update` and
//!   `subscribe` made from inside a callback are applied to the snapshot at once
//!   but delivered only after the current fan-out finishes, so every subscriber
//!   still observes changes in order.

use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::ReentrantMutex;

use super::{Callback, EventSubscribers, Fanout, OwnerId};

/// A notification waiting for the gate's current holder.
enum Deferred<T> {
    Publish(Arc<T>),
    Subscribe(OwnerId, Callback<T>),
}

/// Dispatch state; only touched by the thread holding the gate.
struct Dispatch<T> {
    busy: bool,
    queue: VecDeque<Deferred<T>>,
}

/// State holder with owner-keyed change notification.
///
/// # Example
/// ```rust
/// use std::sync::{Arc, Mutex};
/// use fleetvisor::ObservableState;
///
/// let agents = ObservableState::named("fleet.agents", Vec::<String>::new());
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&seen);
/// agents.subscribe("web-session-1", move |list: &Vec<String>| {
///     sink.lock().unwrap().push(list.len());
/// });
///
/// agents.update(|list| {
///     let mut next = list.clone();
///     next.push("agent-1".into());
///     next
/// });
///
/// // replay of the empty list, then the change
/// assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
/// ```
pub struct ObservableState<T> {
    value: ArcSwap<T>,
    subs: EventSubscribers<T>,
    gate: ReentrantMutex<RefCell<Dispatch<T>>>,
}

impl<T: Send + Sync + 'static> ObservableState<T> {
    /// Creates a cell holding `initial`.
    pub fn new(initial: T) -> Self {
        Self::named("observable", initial)
    }

    /// Creates a cell with a label used in logs.
    pub fn named(name: impl Into<Cow<'static, str>>, initial: T) -> Self {
        Self {
            value: ArcSwap::from_pointee(initial),
            subs: EventSubscribers::named(name),
            gate: ReentrantMutex::new(RefCell::new(Dispatch {
                busy: false,
                queue: VecDeque::new(),
            })),
        }
    }

    /// Returns the current snapshot.
    pub fn get(&self) -> Arc<T> {
        self.value.load_full()
    }

    /// Replaces the snapshot and notifies every subscriber with it.
    ///
    /// Called from inside a callback of this cell, delivery is deferred and the
    /// returned [`Fanout`] is empty.
    pub fn set(&self, value: T) -> Fanout {
        let gate = self.gate.lock();
        let next = Arc::new(value);
        self.value.store(Arc::clone(&next));
        self.dispatch(&gate, Deferred::Publish(next))
    }

    /// Derives the next snapshot from the current one, then notifies.
    ///
    /// The read-modify-write is atomic with respect to other `set`/`update` calls.
    pub fn update<F>(&self, f: F) -> Fanout
    where
        F: FnOnce(&T) -> T,
    {
        let gate = self.gate.lock();
        let current = self.value.load_full();
        let next = Arc::new(f(&current));
        self.value.store(Arc::clone(&next));
        self.dispatch(&gate, Deferred::Publish(next))
    }

    /// Registers `callback` under `owner` (replacing any prior registration)
    /// and immediately invokes it once with the current snapshot.
    ///
    /// Returns `true` if an earlier callback for the same owner was replaced.
    /// Called from inside a callback of this cell, registration and replay run
    /// right after the current fan-out.
    pub fn subscribe<F>(&self, owner: impl Into<OwnerId>, callback: F) -> bool
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let owner = owner.into();
        let callback: Callback<T> = Arc::new(callback);

        let gate = self.gate.lock();
        let replaced = self.subs.contains(&owner);
        self.dispatch(&gate, Deferred::Subscribe(owner, callback));
        replaced
    }

    /// Removes the registration for `owner`; unknown owners are only logged.
    pub fn unsubscribe(&self, owner: &OwnerId) -> bool {
        self.subs.unsubscribe(owner)
    }

    /// Number of subscribers.
    pub fn subscribers(&self) -> usize {
        self.subs.len()
    }

    /// Runs `op` and everything queued behind it; queues `op` if this thread
    /// is already dispatching. Returns the fan-out of `op` itself.
    fn dispatch(&self, gate: &RefCell<Dispatch<T>>, op: Deferred<T>) -> Fanout {
        {
            let mut state = gate.borrow_mut();
            if state.busy {
                state.queue.push_back(op);
                return Fanout::default();
            }
            state.busy = true;
        }

        // Last value delivered in this dispatch; replays use it so a queued
        // subscriber never runs ahead of queued publications.
        let mut latest: Option<Arc<T>> = None;
        let mut first: Option<Fanout> = None;
        let mut next = Some(op);
        while let Some(op) = next {
            let out = match op {
                Deferred::Publish(value) => {
                    let out = self.subs.publish(&value);
                    latest = Some(value);
                    out
                }
                Deferred::Subscribe(owner, callback) => {
                    self.subs.register(owner.clone(), Arc::clone(&callback));
                    let current = latest.get_or_insert_with(|| self.value.load_full());
                    if self.subs.deliver(&owner, &callback, &**current) {
                        Fanout { delivered: 1, faulted: 0 }
                    } else {
                        Fanout { delivered: 0, faulted: 1 }
                    }
                }
            };
            first.get_or_insert(out);
            next = gate.borrow_mut().queue.pop_front();
        }
        gate.borrow_mut().busy = false;
        first.unwrap_or_default()
    }
}

impl<T: fmt::Debug> fmt::Debug for ObservableState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableState")
            .field("name", &self.subs.name())
            .field("value", &self.value.load_full())
            .field("subscribers", &self.subs.len())
            .finish()
    }
}
