//! Structured error types for the scheduler.
//!
//! [`ReplyError`] is the only error type that ever crosses the wire back to a
//! client — every semantic failure (unmet dependency, timeout, dead engine)
//! is surfaced as a normal-looking reply carrying one of its variants, so
//! clients have a single result path to handle. [`SchedulerError`] is for
//! internal/programmer-facing failures (malformed envelopes, channel errors)
//! that are logged and never reach a client.

use thiserror::Error;

use crate::ids::{EngineId, MsgId};

/// Error kinds synthesized into client replies.
///
/// These are never panics and never crash the actor; they are ordinary
/// outcomes of dependency/placement bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplyError {
    /// The task referenced itself in a dependency, or referenced an id the
    /// scheduler has never seen.
    #[error("invalid dependency for {msg_id}: {reason}")]
    InvalidDependency { msg_id: MsgId, reason: String },

    /// The task's `after`/`follow` dependency (or target/blacklist
    /// combination) can never be satisfied given observed finishes.
    #[error("dependency for {msg_id} is impossible to satisfy: {reason}")]
    ImpossibleDependency { msg_id: MsgId, reason: String },

    /// The task sat in the waiting queue past its deadline.
    #[error("task {msg_id} timed out waiting for dependencies")]
    TaskTimeout { msg_id: MsgId },

    /// The engine the task was resident on unregistered before replying.
    #[error("engine {engine} disappeared while running {msg_id}")]
    EngineError { msg_id: MsgId, engine: EngineId },
}

impl ReplyError {
    /// Short machine-readable kind, mirrored into the wire reply's
    /// `status`/error-name field and into monitor events.
    pub fn kind(&self) -> &'static str {
        match self {
            ReplyError::InvalidDependency { .. } => "InvalidDependency",
            ReplyError::ImpossibleDependency { .. } => "ImpossibleDependency",
            ReplyError::TaskTimeout { .. } => "TaskTimeout",
            ReplyError::EngineError { .. } => "EngineError",
        }
    }

    pub fn msg_id(&self) -> &MsgId {
        match self {
            ReplyError::InvalidDependency { msg_id, .. }
            | ReplyError::ImpossibleDependency { msg_id, .. }
            | ReplyError::TaskTimeout { msg_id }
            | ReplyError::EngineError { msg_id, .. } => msg_id,
        }
    }
}

/// Internal errors: malformed input or actor plumbing failures. Never
/// surfaced to a client; always logged and dropped.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("malformed submission envelope: {0}")]
    MalformedEnvelope(String),

    #[error("unknown engine {0} referenced by notification")]
    UnknownEngine(EngineId),

    #[error("output channel closed: {0}")]
    ChannelClosed(&'static str),
}
