//! Entity Events Core - change capture and post-commit event dispatch.
//!
//! This crate watches the writes a persistence engine makes during a unit of
//! work and, once that unit of work commits, fires one change event per
//! changed entity. It is database-agnostic; the `storage-sqlite` crate wires
//! it into Diesel transactions.

pub mod config;
pub mod entity;
pub mod errors;
pub mod events;
pub mod interceptor;

pub use config::{DispatchPolicy, InterceptorConfig};
pub use entity::{
    EntityRef, OwnedCollection, Persistent, PersistentCollection, StatusFlag, Trackable,
};
pub use interceptor::{ChangeInterceptor, Interceptor, TransactionOutcome, UnitOfWork};

// Re-export error types
pub use errors::Error;
pub use errors::Result;
