//! Callback protocol the persistence engine drives.

use serde_json::Value;

use super::frame::FrameId;
use crate::entity::{EntityRef, PersistentCollection};
use crate::errors::Result;

/// How a unit of work ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionOutcome {
    Committed,
    RolledBack,
}

impl TransactionOutcome {
    pub const fn was_committed(self) -> bool {
        matches!(self, TransactionOutcome::Committed)
    }
}

impl From<bool> for TransactionOutcome {
    fn from(committed: bool) -> Self {
        if committed {
            TransactionOutcome::Committed
        } else {
            TransactionOutcome::RolledBack
        }
    }
}

/// Hooks a persistence engine calls while it processes a transaction.
///
/// All callbacks for one transaction arrive on one thread, in line with the
/// write being processed. Every method defaults to doing nothing, so an
/// implementation only overrides what it cares about.
///
/// `state`, `current_state` and `previous_state` are indexed like
/// `property_names`. The `bool` returned by [`on_save`](Self::on_save) and
/// [`on_flush_dirty`](Self::on_flush_dirty) tells the engine whether the
/// interceptor modified the state it was handed.
pub trait Interceptor: Send + Sync {
    /// An entity is about to be inserted.
    fn on_save(&self, _entity: &EntityRef, _state: &[Value], _property_names: &[&str]) -> bool {
        false
    }

    /// A dirty entity is about to be flushed.
    fn on_flush_dirty(
        &self,
        _entity: &EntityRef,
        _current_state: Option<&[Value]>,
        _previous_state: Option<&[Value]>,
        _property_names: &[&str],
    ) -> bool {
        false
    }

    /// An entity is about to be deleted.
    fn on_delete(&self, _entity: &EntityRef, _state: &[Value], _property_names: &[&str]) {}

    /// Elements were added to or removed from a persistent collection.
    fn on_collection_update(&self, _collection: &dyn PersistentCollection) {}

    /// A unit of work started on the calling thread.
    fn after_transaction_begin(&self) {}

    /// The innermost unit of work on the calling thread finished.
    fn after_transaction_completion(&self, _outcome: TransactionOutcome) -> Result<()> {
        Ok(())
    }

    /// Starts a unit of work and returns the frame it owns.
    ///
    /// Interceptors that keep no frames return `None`, and
    /// [`complete_frame`](Self::complete_frame) then falls back to
    /// completing whatever is innermost.
    fn begin_frame(&self) -> Option<FrameId> {
        self.after_transaction_begin();
        None
    }

    /// Completes the unit of work that owns `frame`.
    fn complete_frame(&self, _frame: Option<FrameId>, outcome: TransactionOutcome) -> Result<()> {
        self.after_transaction_completion(outcome)
    }
}

/// Interceptor that ignores every callback.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyInterceptor;

impl Interceptor for EmptyInterceptor {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_from_commit_flag() {
        assert_eq!(TransactionOutcome::from(true), TransactionOutcome::Committed);
        assert_eq!(
            TransactionOutcome::from(false),
            TransactionOutcome::RolledBack
        );
        assert!(TransactionOutcome::Committed.was_committed());
        assert!(!TransactionOutcome::RolledBack.was_committed());
    }

    #[test]
    fn test_empty_interceptor_does_nothing() {
        let interceptor = EmptyInterceptor;
        interceptor.after_transaction_begin();
        assert!(interceptor
            .after_transaction_completion(TransactionOutcome::Committed)
            .is_ok());
        assert_eq!(interceptor.begin_frame(), None);
        assert!(interceptor
            .complete_frame(None, TransactionOutcome::RolledBack)
            .is_ok());
    }
}
