//! Wire-adjacent types: what crosses the four input channels and three
//! output channels of the scheduler actor.
//!
//! The scheduler never deserializes task payloads. [`RawMessage`] is an
//! opaque byte blob forwarded verbatim; only [`Metadata`] (already parsed by
//! the framing layer, an external collaborator) is read.

use chrono::{DateTime, Utc};

use crate::dependency::Dependency;
use crate::error::ReplyError;
use crate::ids::{EngineId, MsgId};

/// The original framed task payload. Forwarded byte-for-byte; never
/// inspected or rewritten by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage(pub Vec<u8>);

/// Routing identities prepended to a framed message, oldest-hop first. On
/// relay to a client the first two identities are swapped: `[engine,
/// client]` becomes `[client, engine]` so the router delivers to the client
/// while the engine identity survives as context.
pub type Idents = Vec<String>;

/// Metadata recognized on a submission. Everything else in the envelope is
/// opaque to the scheduler.
#[derive(Debug, Clone)]
pub struct Metadata {
    pub targets: Vec<EngineId>,
    pub after: Dependency,
    pub follow: Dependency,
    pub timeout: Option<std::time::Duration>,
    pub retries: u32,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            after: Dependency::empty(),
            follow: Dependency::empty(),
            timeout: None,
            retries: 0,
        }
    }
}

/// A new task submitted by a client.
#[derive(Debug, Clone)]
pub struct Submission {
    pub msg_id: MsgId,
    pub idents: Idents,
    pub raw_msg: RawMessage,
    pub metadata: Metadata,
}

/// An apply-reply from an engine about a task it was running.
#[derive(Debug, Clone)]
pub struct EngineResult {
    pub msg_id: MsgId,
    pub engine: EngineId,
    pub idents: Idents,
    pub raw_reply: RawMessage,
    /// `true` if the task ran to success.
    pub success: bool,
    /// `Some(false)` if the engine refused the task because its local
    /// `follow` check disagreed with the scheduler's placement decision.
    /// Such refusals are not a "failure" for retry-accounting purposes.
    pub dependencies_met: Option<bool>,
}

/// Engine up/down signal from the registration service.
#[derive(Debug, Clone)]
pub enum Notification {
    EngineUp(EngineId),
    EngineDown(EngineId),
}

/// A timer firing. Carries enough identity to detect staleness.
#[derive(Debug, Clone)]
pub enum TimerFiring {
    /// A parked job's deadline elapsed.
    JobTimeout {
        msg_id: MsgId,
        timeout_id: u64,
        /// The deadline this firing was armed for, used for the
        /// early-firing clock-skew diagnostic.
        deadline: DateTime<Utc>,
    },
    /// The 5-second grace period after an engine unregistered with pending
    /// work has elapsed; synthesize failures for anything still pending.
    StrandedSweep { engine: EngineId },
}

/// A request from the dispatch core to arm a timer. The runtime actor owns
/// the actual timer wheel; the core only ever asks for one to be armed.
#[derive(Debug, Clone)]
pub struct TimerRequest {
    pub after: std::time::Duration,
    pub firing: TimerFiring,
}

/// A task forwarded to an engine for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub msg_id: MsgId,
    pub engine: EngineId,
    pub raw_msg: RawMessage,
}

/// Outcome relayed (or synthesized) to a client.
#[derive(Debug, Clone)]
pub enum ReplyStatus {
    Ok(RawMessage),
    Err(ReplyError),
}

/// A reply routed back to the client that submitted `msg_id`.
#[derive(Debug, Clone)]
pub struct Reply {
    pub msg_id: MsgId,
    pub idents: Idents,
    pub status: ReplyStatus,
    pub engine: Option<EngineId>,
    pub date: DateTime<Utc>,
}

/// Observability events re-emitted for every inbound task, outbound reply,
/// and placement decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    InTask { msg_id: MsgId },
    OutTask { msg_id: MsgId },
    TaskDestination { msg_id: MsgId, engine: EngineId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_default_is_unrestricted_and_met() {
        let m = Metadata::default();
        assert!(m.targets.is_empty());
        assert!(m.after.is_empty());
        assert!(m.follow.is_empty());
        assert_eq!(m.retries, 0);
        assert!(m.timeout.is_none());
    }
}
