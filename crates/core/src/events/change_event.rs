//! Change event type.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::Action;
use crate::entity::EntityRef;

/// One fact about one entity, fired after the transaction that changed it
/// committed.
///
/// The entity handle travels with the event so in-process subscribers can look
/// at the value itself; it is not part of the serialized form.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub id: Uuid,
    pub action: Action,
    pub entity_type: String,
    pub uuid: String,
    pub fired_at: DateTime<Utc>,
    #[serde(skip)]
    pub entity: EntityRef,
}

impl ChangeEvent {
    /// Creates an event for `entity`, reading its type name and identity now.
    pub fn new(action: Action, entity: EntityRef) -> Self {
        let uuid = entity
            .as_trackable()
            .map(|t| t.uuid().to_string())
            .unwrap_or_default();

        Self {
            id: Uuid::now_v7(),
            action,
            entity_type: entity.entity_type().to_string(),
            uuid,
            fired_at: Utc::now(),
            entity,
        }
    }

    /// Topic name subscribers usually filter on, e.g. `Concept.RETIRED`.
    pub fn topic(&self) -> String {
        format!("{}.{}", self.entity_type, self.action)
    }
}
