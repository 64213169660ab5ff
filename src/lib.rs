//! # task-scheduler
//!
//! The dependency-and-placement scheduler at the heart of a distributed
//! parallel-compute cluster: it mediates between short-lived clients
//! submitting tasks and a dynamic pool of long-running compute engines.
//!
//! ## What it decides
//!
//! For every submitted task, the scheduler decides:
//! - **When** it becomes runnable (its `after` dependencies are satisfied).
//! - **Where** it runs (placement under `follow` affinity and `targets`/
//!   `blacklist` exclusion, load-balanced by a pluggable [`chooser::Scheme`]).
//! - **How** to react to engine failure, timeouts, and dependencies that can
//!   never be satisfied.
//!
//! ## Architecture
//!
//! ```text
//! SchedulerHandle::submit/report_result/notify
//!     │
//!     ▼
//! mpsc channels ──► SchedulerRuntime::run() (tokio::select! loop)
//!     │                       │
//!     │                       ▼
//!     │                 Scheduler::dispatch_submission / dispatch_result
//!     │                 / handle_notification / handle_timer
//!     │                       │
//!     │                       ▼
//!     │                    Outputs { dispatches, replies, monitor, timers }
//!     │                       │
//!     └───────────────────────┴──► mpsc channels out (+ timer wheel re-arm)
//! ```
//!
//! [`scheduler::Scheduler`] is plain data plus synchronous handler methods —
//! it performs no I/O and owns no channels. Every handler takes the current
//! time and accumulates an [`scheduler::Outputs`] value; [`runtime`] is the
//! only module that touches `tokio::sync::mpsc` or `tokio::time`, draining
//! `Outputs` into real channels and arming real timers. That split is what
//! lets the literal end-to-end scenarios this scheduler must satisfy run as
//! ordinary synchronous unit tests.
//!
//! ## Example
//!
//! ```ignore
//! use task_scheduler::{
//!     SchedulerBuilder, SchedulerConfig, EngineId, MsgId, Notification,
//!     Submission, Metadata, RawMessage,
//! };
//!
//! let (runtime, handle, mut dispatches, mut replies, mut monitor) =
//!     SchedulerBuilder::new(SchedulerConfig::default()).build();
//! tokio::spawn(runtime.run());
//!
//! handle.notify(Notification::EngineUp(EngineId::new("engine-1"))).await?;
//! handle.submit(Submission {
//!     msg_id: MsgId::new("t1"),
//!     idents: vec!["client-a".into()],
//!     raw_msg: RawMessage(b"...".to_vec()),
//!     metadata: Metadata::default(),
//! }).await?;
//!
//! let dispatch = dispatches.recv().await.unwrap();
//! // forward dispatch.raw_msg to dispatch.engine over the wire, then
//! // report the engine's reply back via handle.report_result(...).
//! ```
//!
//! ## What this crate is not
//!
//! Out of scope, treated as external collaborators: the client-side
//! submission API, remote function serialization, the engine-side execution
//! runtime, the registration/heartbeat service, the monitoring sink, and the
//! message framing/auth layer. This crate does not validate task payloads
//! beyond structural framing, does not persist state across restarts,
//! provides no fairness guarantee across clients, and never migrates a task
//! once dispatched.

mod chooser;
mod config;
mod dependency;
mod engine;
mod error;
mod graph;
mod ids;
mod job;
mod protocol;
mod runtime;
mod scheduler;

/// Scenario-test harness (feature-gated).
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use chooser::Scheme;
pub use config::{SchedulerConfig, SchedulerConfigBuilder};
pub use dependency::Dependency;
pub use error::{ReplyError, SchedulerError};
pub use ids::{EngineId, MsgId};
pub use protocol::{
    Dispatch, EngineResult, Idents, Metadata, MonitorEvent, Notification, RawMessage, Reply,
    ReplyStatus, Submission, TimerFiring, TimerRequest,
};
pub use runtime::{SchedulerBuilder, SchedulerHandle, SchedulerRuntime};
pub use scheduler::{Outputs, Scheduler};
