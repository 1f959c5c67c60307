//! SQLite glue for entity change events.
//!
//! This crate binds the database-agnostic interceptor from `entity-events-core`
//! to Diesel/SQLite transactions:
//! - Database connection pooling
//! - A single-writer actor that wraps every write job in a unit of work
//! - A tracked connection through which jobs report what they wrote
//!
//! # Architecture
//!
//! ```text
//!   caller ── WriteHandle::exec(job) ──▶ writer actor
//!                                          │  begin unit of work
//!                                          │  BEGIN IMMEDIATE
//!                                          │  job(&mut TrackedConnection)
//!                                          │  COMMIT / ROLLBACK
//!                                          ▼  complete unit of work
//!                                     ChangeEventSink
//! ```

pub mod db;
pub mod errors;

// Re-export database utilities
pub use db::{
    create_pool, get_connection, spawn_writer, DbConnection, DbPool, TrackedConnection,
    WriteHandle,
};

// Re-export storage errors and conversion helpers
pub use errors::{IntoCore, StorageError};

// Re-export from entity-events-core for convenience
pub use entity_events_core::errors::{DatabaseError, Error, Result};
