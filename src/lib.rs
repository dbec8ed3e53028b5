//! # fleetvisor
//!
//! **Fleetvisor** is the coordination substrate of a fleet manager: one
//! controller talking to many agents over persistent connections.
//!
//! It provides four building blocks, all transport-agnostic:
//! tracked background work with a single shutdown point, per-entity priority
//! mailboxes, request/reply correlation over one connection, and owner-keyed
//! observable state for UI-style subscribers.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   transport (socket, channel, ...)                       web sessions / UI
//!        │ frames             ▲ frames                           ▲
//!        ▼                    │                                  │ callbacks
//! ┌─────────────────────────────────────────────┐   ┌──────────────────────────┐
//! │ Connection<M>                               │   │ ObservableState<T>       │
//! │  - on_frame: Reply ─► ReplyCorrelator       │   │  - snapshot (ArcSwap)    │
//! │              Request/OneWay ─► Mailbox<M>   │   │  - EventSubscribers<T>   │
//! │  - request / notify ─► Outbound             │   │    (owner-keyed, replay) │
//! │  - close ─► CloseAll pending replies        │   └──────────────────────────┘
//! └──────┬──────────────────────────┬───────────┘
//!        │ drain loops, expiry sweep│ handler: one message at a time
//!        ▼                          ▼
//! ┌─────────────────────────────────────────────┐
//! │ TaskSupervisor                              │
//! │  - shared CancellationToken (child per task)│
//! │  - DashMap<TaskId, Tracked> + TaskTracker   │
//! │  - events: EventSubscribers<Event>          │──► LogWriter (optional)
//! │  - shutdown: cancel ─► drain within grace   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ### Message path
//! ```text
//! remote request ──► on_frame ──► decode M ──► mailbox.enqueue(Inbound{msg, reply})
//!                                               ├─ M::priority() == JumpAhead ─► jump tier
//!                                               └─ otherwise                  ─► normal tier
//! drain loop (tracked task) ──► handler.handle(inbound) ──► reply.reply(&resp) ──► Outbound
//!
//! local request ──► correlator.send(req, cancel)
//!                     ├─ seq = next, pending[seq] = waiter, Outbound ◄─ Request{seq}
//!                     └─ resolves on: Reply{seq} | cancel | close | deadline
//! ```
//!
//! ## Features
//! | Area              | Description                                                     | Key types / traits                              |
//! |-------------------|-----------------------------------------------------------------|-------------------------------------------------|
//! | **Supervision**   | Track background work, contain failures, drain on shutdown.     | [`TaskSupervisor`], [`TaskHandle`], [`TaskId`]  |
//! | **Mailboxes**     | Two-tier queues with exclusive per-entity processing.           | [`Mailbox`], [`Handler`], [`Prioritized`]       |
//! | **Request/reply** | Sequence-number correlation, reply ports, connection glue.      | [`ReplyCorrelator`], [`Connection`], [`Frame`]  |
//! | **Observation**   | Owner-keyed subscriptions, snapshot replay, runtime events.     | [`ObservableState`], [`EventSubscribers`]       |
//! | **Errors**        | Typed errors for runtime, task and reply failures.              | [`RuntimeError`], [`TaskError`], [`ReplyError`] |
//! | **Configuration** | Shutdown grace, reply deadlines, sweep period.                  | [`Config`]                                      |
//!
//! ## Optional features
//! - `logging` (default): exports [`LogWriter`], a ready-made renderer of runtime [`Event`]s.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use serde::{Deserialize, Serialize};
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//! use fleetvisor::{
//!     Config, Connection, Handler, Inbound, Prioritized, Priority, TaskError, TaskSupervisor,
//! };
//!
//! #[derive(Serialize, Deserialize)]
//! enum Command {
//!     Stop,
//!     Status,
//! }
//!
//! impl Prioritized for Command {
//!     fn priority(&self) -> Priority {
//!         match self {
//!             Command::Stop => Priority::JumpAhead,
//!             Command::Status => Priority::Normal,
//!         }
//!     }
//! }
//!
//! struct Agent;
//!
//! #[async_trait]
//! impl Handler<Inbound<Command>> for Agent {
//!     async fn handle(&self, inbound: Inbound<Command>, _ctx: &CancellationToken) -> Result<(), TaskError> {
//!         if let (Command::Status, Some(port)) = (&inbound.msg, inbound.reply) {
//!             port.reply("running").await.map_err(|e| TaskError::fail(e.to_string()))?;
//!         }
//!         Ok(())
//!     }
//! }
//!
//! struct Controller;
//!
//! #[async_trait]
//! impl Handler<Inbound<Command>> for Controller {
//!     async fn handle(&self, _inbound: Inbound<Command>, _ctx: &CancellationToken) -> Result<(), TaskError> {
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sup = TaskSupervisor::new(Config::default());
//!
//!     // in-memory link: each side's Outbound feeds the other side's on_frame
//!     let (to_agent, mut agent_rx) = mpsc::unbounded_channel();
//!     let (to_ctrl, mut ctrl_rx) = mpsc::unbounded_channel();
//!     let controller: Connection<Command> =
//!         Connection::new("agent-1", std::sync::Arc::new(to_agent), Controller, &sup)?;
//!     let agent: Connection<Command> =
//!         Connection::new("controller", std::sync::Arc::new(to_ctrl), Agent, &sup)?;
//!
//!     tokio::spawn(async move {
//!         while let Some(frame) = agent_rx.recv().await {
//!             let _ = agent.on_frame(frame);
//!         }
//!     });
//!     let pump = std::sync::Arc::new(controller);
//!     let inbound = std::sync::Arc::clone(&pump);
//!     tokio::spawn(async move {
//!         while let Some(frame) = ctrl_rx.recv().await {
//!             let _ = inbound.on_frame(frame);
//!         }
//!     });
//!
//!     let status: String = pump.request(&Command::Status, &CancellationToken::new()).await?;
//!     assert_eq!(status, "running");
//!
//!     pump.close("demo over");
//!     sup.shutdown().await?;
//!     Ok(())
//! }
//! ```
mod config;
mod core;
mod error;
mod events;
mod mailbox;
mod rpc;
mod subscribers;

// ---- Public re-exports ----

pub use config::Config;
pub use core::{TaskHandle, TaskId, TaskSupervisor};
pub use error::{CodecError, ReplyError, RuntimeError, TaskError};
pub use events::{Event, EventKind};
pub use mailbox::{Handler, Mailbox, Prioritized, Priority};
pub use rpc::{
    Codec, Connection, Frame, FrameKind, Inbound, JsonCodec, Outbound, PendingReply, ReplyCorrelator,
    ReplyPort,
};
pub use subscribers::{Callback, EventSubscribers, Fanout, ObservableState, OwnerId};

// Optional: expose a simple built-in runtime-event renderer.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
