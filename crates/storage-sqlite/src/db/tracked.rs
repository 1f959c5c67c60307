//! Connection wrapper handed to write jobs.
//!
//! Diesel has no entity lifecycle hooks, so write jobs report what they wrote
//! through this wrapper. Each `record_*` call is forwarded to the interceptor
//! on the writer's thread, inside the unit of work the writer opened.

use diesel::sqlite::SqliteConnection;
use entity_events_core::{EntityRef, Interceptor, OwnedCollection};
use serde_json::Value;

pub struct TrackedConnection<'a> {
    conn: &'a mut SqliteConnection,
    interceptor: &'a dyn Interceptor,
}

impl<'a> TrackedConnection<'a> {
    pub fn new(conn: &'a mut SqliteConnection, interceptor: &'a dyn Interceptor) -> Self {
        Self { conn, interceptor }
    }

    /// The underlying connection, already inside the job's transaction.
    pub fn conn(&mut self) -> &mut SqliteConnection {
        self.conn
    }

    pub fn record_insert(&self, entity: &EntityRef, state: &[Value], property_names: &[&str]) {
        self.interceptor.on_save(entity, state, property_names);
    }

    pub fn record_update(
        &self,
        entity: &EntityRef,
        current_state: &[Value],
        previous_state: Option<&[Value]>,
        property_names: &[&str],
    ) {
        self.interceptor
            .on_flush_dirty(entity, Some(current_state), previous_state, property_names);
    }

    pub fn record_delete(&self, entity: &EntityRef, state: &[Value], property_names: &[&str]) {
        self.interceptor.on_delete(entity, state, property_names);
    }

    /// Reports that the `role` collection of `owner` gained or lost elements.
    pub fn record_collection_update(&self, role: &str, owner: &EntityRef) {
        self.interceptor
            .on_collection_update(&OwnedCollection::new(role, owner.clone()));
    }
}
