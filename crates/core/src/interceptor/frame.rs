//! Per-transaction change buffers.

use std::collections::HashSet;

use crate::entity::{EntityKey, EntityRef};
use crate::events::Action;

/// Bucket an entity lands in while its transaction is open.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeCategory {
    Deleted,
    Inserted,
    Updated,
    Retired,
    Unretired,
    Voided,
    Unvoided,
}

/// Drain order on commit. Deletes go first so a delete followed by a
/// re-insert of the same identity reads as purge-then-create downstream.
pub const FLUSH_ORDER: [(ChangeCategory, Action); 7] = [
    (ChangeCategory::Deleted, Action::Purged),
    (ChangeCategory::Inserted, Action::Created),
    (ChangeCategory::Updated, Action::Updated),
    (ChangeCategory::Retired, Action::Retired),
    (ChangeCategory::Unretired, Action::Unretired),
    (ChangeCategory::Voided, Action::Voided),
    (ChangeCategory::Unvoided, Action::Unvoided),
];

impl ChangeCategory {
    pub const fn action(self) -> Action {
        match self {
            ChangeCategory::Deleted => Action::Purged,
            ChangeCategory::Inserted => Action::Created,
            ChangeCategory::Updated => Action::Updated,
            ChangeCategory::Retired => Action::Retired,
            ChangeCategory::Unretired => Action::Unretired,
            ChangeCategory::Voided => Action::Voided,
            ChangeCategory::Unvoided => Action::Unvoided,
        }
    }

    const fn slot(self) -> usize {
        match self {
            ChangeCategory::Deleted => 0,
            ChangeCategory::Inserted => 1,
            ChangeCategory::Updated => 2,
            ChangeCategory::Retired => 3,
            ChangeCategory::Unretired => 4,
            ChangeCategory::Voided => 5,
            ChangeCategory::Unvoided => 6,
        }
    }
}

/// Identity of one open frame, handed to the unit of work that owns it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameId(u64);

impl FrameId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

/// The seven change sets of one open unit of work.
#[derive(Debug, Default)]
pub struct TransactionFrame {
    sets: [HashSet<EntityKey>; 7],
}

impl TransactionFrame {
    /// Adds `entity` to `category`. Returns false if it was already there.
    pub fn record(&mut self, category: ChangeCategory, entity: EntityRef) -> bool {
        self.sets[category.slot()].insert(EntityKey(entity))
    }

    pub fn len(&self, category: ChangeCategory) -> usize {
        self.sets[category.slot()].len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.iter().all(HashSet::is_empty)
    }

    /// Consumes the frame into `(action, entity)` pairs in [`FLUSH_ORDER`].
    pub fn drain(self) -> Vec<(Action, EntityRef)> {
        let mut sets = self.sets;
        let mut out = Vec::with_capacity(sets.iter().map(HashSet::len).sum());
        for (category, action) in FLUSH_ORDER {
            let set = std::mem::take(&mut sets[category.slot()]);
            out.extend(set.into_iter().map(|key| (action, key.0)));
        }
        out
    }
}
