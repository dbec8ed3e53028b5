//! # Owner-keyed subscriptions and observable state.
//!
//! This module provides the one-to-many notification points of the runtime.
//!
//! ## Architecture
//! ```text
//!   owner (web session, agent link, component)
//!        │ subscribe(owner_id, callback)
//!        ▼
//!   EventSubscribers<T> ── DashMap<OwnerId, Callback<T>>
//!        ▲                    │ publish(&T): synchronous, per-callback panic isolation
//!        │                    ▼
//!   ObservableState<T> ── current snapshot (ArcSwap) + replay on subscribe
//! ```
//!
//! ## Contents
//! - [`OwnerId`] caller-chosen subscriber identity
//! - [`EventSubscribers`] registry used for plain notifications (membership
//!   changes, runtime [`Event`](crate::Event)s)
//! - [`ObservableState`] state cell with snapshot replay
//! - [`LogWriter`] ready-made runtime-event renderer (feature `logging`)

mod observable;
mod owner;
mod set;

#[cfg(feature = "logging")]
mod log;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use observable::ObservableState;
pub use owner::OwnerId;
pub use set::{Callback, EventSubscribers, Fanout};
