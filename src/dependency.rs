//! The dependency predicate: a set of task-ids with {all, success, failure}
//! semantics, used both for ordering (`after`) and placement affinity
//! (`follow`).

use std::collections::HashSet;

use crate::ids::MsgId;

/// A set of task ids together with flags describing how the set must be
/// satisfied.
///
/// `all = true` requires every id to satisfy the condition; `all = false`
/// requires at least one. `success`/`failure` select which finished pool
/// (completed, failed, or both) counts as "satisfying" for a given id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    ids: HashSet<MsgId>,
    pub all: bool,
    pub success: bool,
    pub failure: bool,
}

impl Default for Dependency {
    fn default() -> Self {
        Self::empty()
    }
}

impl Dependency {
    /// The always-met empty dependency. Cheap to construct repeatedly since
    /// it never allocates beyond the empty `HashSet`.
    pub fn empty() -> Self {
        Self {
            ids: HashSet::new(),
            all: true,
            success: true,
            failure: false,
        }
    }

    pub fn new<I>(ids: I, all: bool, success: bool, failure: bool) -> Self
    where
        I: IntoIterator<Item = MsgId>,
    {
        Self {
            ids: ids.into_iter().collect(),
            all,
            success,
            failure,
        }
    }

    /// Copy another dependency's id set but keep that dependency's flags.
    pub fn with_ids<I>(ids: I, flags_from: &Dependency) -> Self
    where
        I: IntoIterator<Item = MsgId>,
    {
        Self {
            ids: ids.into_iter().collect(),
            all: flags_from.all,
            success: flags_from.success,
            failure: flags_from.failure,
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = &MsgId> {
        self.ids.iter()
    }

    pub fn contains(&self, id: &MsgId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// A dependency whose id set is empty is vacuously satisfied.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// True once the dependency's condition is satisfied given the global
    /// completed (`completed`) and failed (`failed`) sets.
    pub fn met(&self, completed: &HashSet<MsgId>, failed: &HashSet<MsgId>) -> bool {
        if self.is_empty() {
            return true;
        }
        let satisfies = |id: &MsgId| -> bool {
            (self.success && completed.contains(id)) || (self.failure && failed.contains(id))
        };
        if self.all {
            self.ids.iter().all(satisfies)
        } else {
            self.ids.iter().any(satisfies)
        }
    }

    /// True once no future extension of `completed`/`failed` can ever make
    /// this dependency met — every still-relevant id has already finished,
    /// just not in the pool(s) that would satisfy it.
    pub fn unreachable(&self, completed: &HashSet<MsgId>, failed: &HashSet<MsgId>) -> bool {
        if self.is_empty() {
            return false;
        }
        let finished = |id: &MsgId| -> bool { completed.contains(id) || failed.contains(id) };
        let satisfies = |id: &MsgId| -> bool {
            (self.success && completed.contains(id)) || (self.failure && failed.contains(id))
        };
        if self.all {
            // any finished id that does not satisfy dooms the whole set
            self.ids
                .iter()
                .any(|id| finished(id) && !satisfies(id))
        } else {
            // unreachable only once every id has finished and none satisfied
            self.ids.iter().all(finished) && !self.ids.iter().any(satisfies)
        }
    }

    /// Subtract `other`'s ids from `self`'s, keeping `self`'s flags. Used to
    /// canonicalize `after` on submission by removing ids already finished.
    pub fn difference(&self, other: &HashSet<MsgId>) -> Self {
        Self::with_ids(
            self.ids.iter().filter(|id| !other.contains(*id)).cloned(),
            self,
        )
    }

    pub fn intersection(&self, other: &HashSet<MsgId>) -> Self {
        Self::with_ids(
            self.ids.iter().filter(|id| other.contains(*id)).cloned(),
            self,
        )
    }

    pub fn union(&self, other: &HashSet<MsgId>) -> Self {
        Self::with_ids(self.ids.iter().cloned().chain(other.iter().cloned()), self)
    }

    /// Canonicalize for cheap repeated `met` checks: if `all`, drop ids that
    /// already individually satisfy the condition; if the whole dependency
    /// is now met, collapse to the always-met empty sentinel.
    pub fn canonicalize(self, completed: &HashSet<MsgId>, failed: &HashSet<MsgId>) -> Self {
        let mut this = self;
        if this.all {
            let satisfied: HashSet<MsgId> = this
                .ids
                .iter()
                .filter(|id| {
                    (this.success && completed.contains(*id))
                        || (this.failure && failed.contains(*id))
                })
                .cloned()
                .collect();
            this = this.difference(&satisfied);
        }
        if this.met(completed, failed) {
            this = Dependency::empty();
        }
        this
    }
}
