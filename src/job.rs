//! The waiting-queue job record and its FIFO-with-lazy-deletion index.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};

use crate::dependency::Dependency;
use crate::ids::{EngineId, MsgId};
use crate::protocol::{Idents, Metadata, RawMessage};

/// One submitted task, tracked while it waits for its dependencies and
/// placement constraints to become satisfiable.
#[derive(Debug, Clone)]
pub struct Job {
    pub msg_id: MsgId,
    pub raw_msg: RawMessage,
    pub idents: Idents,
    pub targets: Vec<EngineId>,
    pub after: Dependency,
    pub follow: Dependency,
    pub timeout: Option<std::time::Duration>,
    pub timestamp: DateTime<Utc>,
    pub blacklist: HashSet<EngineId>,
    pub retries: u32,
    /// Tombstone: once set, the entry is skipped wherever `queue` is walked.
    pub removed: bool,
    /// Bumped every time a timer is (re-)armed for this job; a firing whose
    /// `timeout_id` no longer matches is stale and ignored.
    pub timeout_id: u64,
}

impl Job {
    pub fn new(msg_id: MsgId, raw_msg: RawMessage, idents: Idents, metadata: Metadata, now: DateTime<Utc>) -> Self {
        Self {
            msg_id,
            raw_msg,
            idents,
            targets: metadata.targets,
            after: metadata.after,
            follow: metadata.follow,
            timeout: metadata.timeout,
            timestamp: now,
            blacklist: HashSet::new(),
            retries: metadata.retries,
            removed: false,
            timeout_id: 0,
        }
    }

    /// All ids this job's ordering/placement constraints still reference.
    pub fn dependency_ids(&self) -> impl Iterator<Item = &MsgId> {
        self.after.ids().chain(self.follow.ids())
    }
}

/// FIFO-by-submission waiting set with O(1) lookup and lazy deletion.
///
/// `queue` may contain tombstoned (`removed = true`) entries; pops skip
/// them. `queue_map` is the source of truth for "is this job currently
/// waiting".
#[derive(Debug, Default)]
pub struct WaitingQueue {
    queue: VecDeque<MsgId>,
    queue_map: HashMap<MsgId, Job>,
}

impl WaitingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a job at the back of the queue.
    pub fn push(&mut self, job: Job) {
        let msg_id = job.msg_id.clone();
        self.queue.push_back(msg_id.clone());
        self.queue_map.insert(msg_id, job);
    }

    /// Re-insert `job` and tombstone it in the same step — used by
    /// `fail_unreachable` call sites that discover a job is unreachable
    /// before it was ever otherwise tracked in the waiting set (see
    /// `SPEC_FULL.md` §9). The job is left popped (as if it had been
    /// dispatched or had failed normally) rather than physically absent.
    pub fn insert_tombstoned(&mut self, mut job: Job) {
        job.removed = true;
        self.queue_map.insert(job.msg_id.clone(), job);
    }

    pub fn contains(&self, msg_id: &MsgId) -> bool {
        self.queue_map
            .get(msg_id)
            .map(|j| !j.removed)
            .unwrap_or(false)
    }

    pub fn get(&self, msg_id: &MsgId) -> Option<&Job> {
        self.queue_map.get(msg_id).filter(|j| !j.removed)
    }

    pub fn get_mut(&mut self, msg_id: &MsgId) -> Option<&mut Job> {
        self.queue_map.get_mut(msg_id).filter(|j| !j.removed)
    }

    /// Tombstone a job and pop it out of `queue_map` entirely, returning it.
    /// Used when a job leaves the waiting set for good (dispatched or
    /// failed).
    pub fn take(&mut self, msg_id: &MsgId) -> Option<Job> {
        self.queue_map.remove(msg_id)
    }

    /// Whether `msg_id` is tracked at all (tombstoned or not). Used by
    /// `fail_unreachable` to decide whether a job must first be registered
    /// via `insert_tombstoned` before it can be popped.
    pub fn is_tracked(&self, msg_id: &MsgId) -> bool {
        self.queue_map.contains_key(msg_id)
    }

    /// Drain `queue` entirely, returning live (non-tombstoned) jobs in FIFO
    /// submission order. The deque is empty afterwards — callers that still
    /// want some of these ids tracked in FIFO order must `restore_front`
    /// them explicitly; `drain_fifo_order` never holds any back itself.
    pub fn drain_fifo_order(&mut self) -> Vec<MsgId> {
        let mut order = Vec::with_capacity(self.queue.len());
        for msg_id in self.queue.drain(..) {
            if let Some(job) = self.queue_map.get(&msg_id) {
                if !job.removed {
                    order.push(msg_id);
                }
            }
        }
        order
    }

    /// Re-insert a still-waiting job into `queue_map` only, bypassing
    /// `queue`. Used by `update_graph`'s targeted-mode rescan, where `queue`
    /// was never drained and a `push` would leave a duplicate entry behind.
    pub fn put_back(&mut self, job: Job) {
        self.queue_map.insert(job.msg_id.clone(), job);
    }

    /// Re-insert ids at the front of `queue`, preserving their relative
    /// order. Used by `update_graph`'s full-scan restore list.
    pub fn restore_front(&mut self, ids: Vec<MsgId>) {
        for msg_id in ids.into_iter().rev() {
            self.queue.push_front(msg_id);
        }
    }

    pub fn len(&self) -> usize {
        self.queue_map.values().filter(|j| !j.removed).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
