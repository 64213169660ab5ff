//! The engine table: LRU-ordered placement candidates plus per-engine
//! pending/completed/failed bookkeeping.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::ids::{EngineId, MsgId};
use crate::job::Job;

#[derive(Debug, Default)]
struct EngineRecord {
    pending: HashMap<MsgId, Job>,
    completed: HashSet<MsgId>,
    failed: HashSet<MsgId>,
}

/// Two LRU-ordered parallel sequences (`targets`, `loads`) plus per-engine
/// result bookkeeping. The head of both sequences is the least-recently-used
/// engine; dispatch rotates the chosen engine to the tail.
#[derive(Debug, Default)]
pub struct EngineTable {
    targets: VecDeque<EngineId>,
    loads: VecDeque<u32>,
    records: HashMap<EngineId, EngineRecord>,
}

impl EngineTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly-up engine. It becomes the LRU (head of both
    /// sequences) with load zero.
    pub fn register(&mut self, engine: EngineId) {
        self.targets.push_front(engine.clone());
        self.loads.push_front(0);
        self.records.insert(engine, EngineRecord::default());
    }

    /// Remove an engine from the placement candidates. Its pending set (if
    /// any) is left in `records` for the caller to inspect (stranded-task
    /// handling) and must be cleared explicitly via `drop_records`.
    pub fn unregister(&mut self, engine: &EngineId) {
        if let Some(idx) = self.index_of(engine) {
            self.targets.remove(idx);
            self.loads.remove(idx);
        }
    }

    pub fn drop_records(&mut self, engine: &EngineId) {
        self.records.remove(engine);
    }

    pub fn is_registered(&self, engine: &EngineId) -> bool {
        self.targets.contains(engine)
    }

    pub fn index_of(&self, engine: &EngineId) -> Option<usize> {
        self.targets.iter().position(|e| e == engine)
    }

    pub fn load(&self, engine: &EngineId) -> Option<u32> {
        self.index_of(engine).map(|i| self.loads[i])
    }

    /// Loads in current LRU order, for feeding to a chooser strategy.
    pub fn loads_vec(&self) -> Vec<u32> {
        self.loads.iter().copied().collect()
    }

    /// Engine ids in current LRU order, parallel to `loads_vec`.
    pub fn targets_vec(&self) -> Vec<EngineId> {
        self.targets.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Indices (in current LRU order) whose load is below `hwm`. All
    /// indices if `hwm == 0`.
    pub fn available_indices(&self, hwm: u32) -> Vec<usize> {
        if hwm == 0 {
            (0..self.loads.len()).collect()
        } else {
            self.loads
                .iter()
                .enumerate()
                .filter(|(_, &l)| l < hwm)
                .map(|(i, _)| i)
                .collect()
        }
    }

    /// Record dispatch: increment the engine's load, rotate it to the tail
    /// (LRU update), and move the job into its pending set.
    pub fn dispatch(&mut self, engine: &EngineId, job: Job) {
        if let Some(idx) = self.index_of(engine) {
            self.loads[idx] += 1;
            let id = self.targets.remove(idx).expect("index just checked");
            let load = self.loads.remove(idx).expect("index just checked");
            self.targets.push_back(id);
            self.loads.push_back(load);
        }
        self.records
            .entry(engine.clone())
            .or_default()
            .pending
            .insert(job.msg_id.clone(), job);
    }

    /// Decrement an engine's load by one (floor at zero). No-op if the
    /// engine is no longer registered.
    pub fn release_load(&mut self, engine: &EngineId) {
        if let Some(idx) = self.index_of(engine) {
            self.loads[idx] = self.loads[idx].saturating_sub(1);
        }
    }

    pub fn remove_pending(&mut self, engine: &EngineId, msg_id: &MsgId) -> Option<Job> {
        self.records.get_mut(engine)?.pending.remove(msg_id)
    }

    pub fn pending_ids(&self, engine: &EngineId) -> Vec<MsgId> {
        self.records
            .get(engine)
            .map(|r| r.pending.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_pending(&self, engine: &EngineId) -> bool {
        self.records
            .get(engine)
            .map(|r| !r.pending.is_empty())
            .unwrap_or(false)
    }

    pub fn mark_completed(&mut self, engine: &EngineId, msg_id: MsgId) {
        self.records
            .entry(engine.clone())
            .or_default()
            .completed
            .insert(msg_id);
    }

    pub fn mark_failed(&mut self, engine: &EngineId, msg_id: MsgId) {
        self.records
            .entry(engine.clone())
            .or_default()
            .failed
            .insert(msg_id);
    }

    pub fn completed(&self, engine: &EngineId) -> HashSet<MsgId> {
        self.records
            .get(engine)
            .map(|r| r.completed.clone())
            .unwrap_or_default()
    }

    pub fn failed(&self, engine: &EngineId) -> HashSet<MsgId> {
        self.records
            .get(engine)
            .map(|r| r.failed.clone())
            .unwrap_or_default()
    }
}
