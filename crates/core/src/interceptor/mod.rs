//! Change interceptor.
//!
//! Turns persistence callbacks into per-transaction change sets and fires one
//! change event per entity per category once the transaction commits. Nothing
//! is fired for rolled-back work, and every completion discards its frame.

mod callbacks;
mod change_interceptor;
mod frame;
mod state;
mod unit_of_work;

pub use callbacks::{EmptyInterceptor, Interceptor, TransactionOutcome};
pub use change_interceptor::ChangeInterceptor;
pub use frame::{ChangeCategory, FrameId, TransactionFrame, FLUSH_ORDER};
pub use unit_of_work::UnitOfWork;
