//! # EventSubscribers: synchronous fan-out keyed by owner identity.
//!
//! [`EventSubscribers`] maps an [`OwnerId`] to a callback and delivers every
//! published value to every registered callback, on the publisher's thread,
//! before `publish` returns.
//!
//! ## What it guarantees
//! - One live registration per owner: subscribing again **replaces** the callback.
//! - Concurrent `subscribe` / `unsubscribe` / `publish` from any thread without
//!   external locking.
//! - Panics inside callbacks are caught and logged (isolation): the remaining
//!   callbacks still receive the value.
//!
//! ## What it does **not** guarantee
//! - No ordering across different subscribers.
//! - A callback unsubscribed while a `publish` is in flight may still receive
//!   that one value (the fan-out works on a snapshot of the registry).
//!
//! ## Diagram
//! ```text
//!    publish(&value)
//!        │  snapshot of DashMap<OwnerId, Callback>
//!        ├────────► catch_unwind(cb_1(&value))
//!        ├────────► catch_unwind(cb_2(&value))   ── panic → warn!, continue
//!        └────────► catch_unwind(cb_N(&value))
//! ```
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use fleetvisor::EventSubscribers;
//!
//! let joined: EventSubscribers<String> = EventSubscribers::named("fleet.joined");
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&seen);
//! joined.subscribe("dashboard", move |_agent: &String| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! joined.publish(&"agent-1".to_string());
//! assert_eq!(seen.load(Ordering::SeqCst), 1);
//! assert!(joined.unsubscribe(&"dashboard".into()));
//! ```

use std::borrow::Cow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;

use super::OwnerId;
use crate::error::panic_info;

/// Shared subscriber callback.
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fanout {
    /// Callbacks that returned normally.
    pub delivered: usize,
    /// Callbacks that panicked.
    pub faulted: usize,
}

/// Thread-safe registry of owner-keyed callbacks.
pub struct EventSubscribers<T> {
    name: Cow<'static, str>,
    subs: DashMap<OwnerId, Callback<T>>,
}

impl<T> EventSubscribers<T> {
    /// Creates an empty registry labelled `subscribers` in logs.
    pub fn new() -> Self {
        Self::named("subscribers")
    }

    /// Creates an empty registry with a label used in logs.
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            subs: DashMap::new(),
        }
    }

    /// Registry label.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers `callback` under `owner`, replacing any prior registration.
    ///
    /// Returns `true` if an earlier callback for the same owner was replaced.
    pub fn subscribe<F>(&self, owner: impl Into<OwnerId>, callback: F) -> bool
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.register(owner.into(), Arc::new(callback))
    }

    /// Removes the registration for `owner`.
    ///
    /// Returns `false` (and logs at debug level) when nothing was registered;
    /// this is never an error for the caller.
    pub fn unsubscribe(&self, owner: &OwnerId) -> bool {
        if self.subs.remove(owner).is_some() {
            true
        } else {
            tracing::debug!(registry = %self.name, owner = %owner, "unsubscribe for unknown owner");
            false
        }
    }

    /// Delivers `value` to every registered callback.
    ///
    /// Each callback runs in isolation: a panic is caught, logged and counted
    /// in [`Fanout::faulted`] without affecting the others.
    pub fn publish(&self, value: &T) -> Fanout {
        // Snapshot first so no shard lock is held while callbacks run.
        let targets: Vec<(OwnerId, Callback<T>)> = self
            .subs
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut out = Fanout::default();
        for (owner, callback) in targets {
            if self.deliver(&owner, &callback, value) {
                out.delivered += 1;
            } else {
                out.faulted += 1;
            }
        }
        out
    }

    /// True if `owner` currently has a registration.
    pub fn contains(&self, owner: &OwnerId) -> bool {
        self.subs.contains_key(owner)
    }

    /// Number of registered owners.
    pub fn len(&self) -> usize {
        self.subs.len()
    }

    /// True if there are no subscribers.
    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    pub(crate) fn register(&self, owner: OwnerId, callback: Callback<T>) -> bool {
        self.subs.insert(owner, callback).is_some()
    }

    /// Invokes one callback; returns `false` if it panicked.
    pub(crate) fn deliver(&self, owner: &OwnerId, callback: &Callback<T>, value: &T) -> bool {
        match panic::catch_unwind(AssertUnwindSafe(|| callback(value))) {
            Ok(()) => true,
            Err(payload) => {
                tracing::warn!(
                    registry = %self.name,
                    owner = %owner,
                    info = %panic_info(payload.as_ref()),
                    "subscriber callback panicked"
                );
                false
            }
        }
    }
}

impl<T> Default for EventSubscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}
