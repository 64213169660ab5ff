//! Reverse dependency index: for each dep-id, the set of waiting tasks that
//! mention it in their `after` or `follow`.

use std::collections::{HashMap, HashSet};

use crate::ids::MsgId;

#[derive(Debug, Default)]
pub struct DependencyGraph {
    dependents: HashMap<MsgId, HashSet<MsgId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `waiter` depends on `dep_id`.
    pub fn add(&mut self, dep_id: MsgId, waiter: MsgId) {
        self.dependents.entry(dep_id).or_default().insert(waiter);
    }

    /// All currently-waiting jobs that mention `dep_id`.
    pub fn dependents_of(&self, dep_id: &MsgId) -> Vec<MsgId> {
        self.dependents
            .get(dep_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove `waiter` from every `dep_id`'s dependent set. Called once a
    /// job leaves the waiting set (dispatched or failed) so stale entries
    /// don't accumulate.
    pub fn remove_waiter<'a>(&mut self, waiter: &MsgId, dep_ids: impl Iterator<Item = &'a MsgId>) {
        for dep_id in dep_ids {
            if let Some(set) = self.dependents.get_mut(dep_id) {
                set.remove(waiter);
                if set.is_empty() {
                    self.dependents.remove(dep_id);
                }
            }
        }
    }
}
