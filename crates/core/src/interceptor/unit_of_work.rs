use std::marker::PhantomData;

use log::{debug, error};

use super::callbacks::{Interceptor, TransactionOutcome};
use super::frame::FrameId;
use crate::errors::Result;

/// Scope of one unit of work on the current thread.
///
/// Creating it calls [`Interceptor::after_transaction_begin`]; finishing it
/// calls [`Interceptor::after_transaction_completion`] exactly once. Dropping
/// it unfinished, including while unwinding, completes it as rolled back.
///
/// The guard owns the frame it opened. Completing an enclosing unit of work
/// first rolls back any inner ones still open; completing an inner guard after
/// that is a no-op on rollback and [`Error::UnitOfWorkClosed`] on commit.
///
/// The guard is neither `Send` nor `Sync`: begin and completion have to run on
/// the same thread because frames are kept per thread.
///
/// [`Error::UnitOfWorkClosed`]: crate::errors::Error::UnitOfWorkClosed
#[must_use = "dropping a UnitOfWork immediately rolls it back"]
pub struct UnitOfWork<'a> {
    interceptor: &'a dyn Interceptor,
    frame: Option<FrameId>,
    completed: bool,
    _thread_bound: PhantomData<*const ()>,
}

impl<'a> UnitOfWork<'a> {
    pub fn begin(interceptor: &'a dyn Interceptor) -> Self {
        let frame = interceptor.begin_frame();
        Self {
            interceptor,
            frame,
            completed: false,
            _thread_bound: PhantomData,
        }
    }

    pub fn commit(self) -> Result<()> {
        self.complete(TransactionOutcome::Committed)
    }

    pub fn rollback(self) -> Result<()> {
        self.complete(TransactionOutcome::RolledBack)
    }

    pub fn complete(mut self, outcome: TransactionOutcome) -> Result<()> {
        self.completed = true;
        self.interceptor.complete_frame(self.frame, outcome)
    }

    /// The frame this unit of work owns, if the interceptor keeps frames.
    pub fn frame(&self) -> Option<FrameId> {
        self.frame
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.completed = true;
            debug!("Unit of work dropped without completion, rolling back");
            if let Err(e) = self
                .interceptor
                .complete_frame(self.frame, TransactionOutcome::RolledBack)
            {
                error!("Rolling back dropped unit of work failed: {}", e);
            }
        }
    }
}
