//! Capabilities the interceptor looks for on persisted values.
//!
//! The persistence engine hands the interceptor whatever it is writing. Only
//! values that expose the [`Trackable`] capability take part in change capture;
//! everything else passes through untouched.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Shared handle to a persisted value. Identity is the allocation, not the value.
pub type EntityRef = Arc<dyn Persistent>;

/// Any value the persistence engine writes.
pub trait Persistent: fmt::Debug + Send + Sync {
    /// Entity type name, e.g. `"Concept"`.
    fn entity_type(&self) -> &str;

    /// Returns the trackable view of this value, if it has one.
    fn as_trackable(&self) -> Option<&dyn Trackable> {
        None
    }
}

/// A domain value with a stable identity, eligible for change capture.
pub trait Trackable {
    /// Stable identity of the value.
    fn uuid(&self) -> &str;

    /// The status flag this type declares, if any.
    ///
    /// A type declares at most one flag. Types that are both retireable and
    /// voidable are not supported.
    fn status_flag(&self) -> Option<StatusFlag> {
        None
    }
}

/// Boolean property marking a value as administratively deactivated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFlag {
    /// The value can be retired (and unretired).
    Retired,
    /// The value can be voided (and unvoided).
    Voided,
}

/// A persistent collection owned by another value.
pub trait PersistentCollection: fmt::Debug {
    /// Property name of the collection on its owner.
    fn role(&self) -> &str;

    /// The owning value, if the collection is attached to one.
    fn owner(&self) -> Option<EntityRef>;
}

/// Plain [`PersistentCollection`] for engines that only know role and owner.
#[derive(Clone, Debug)]
pub struct OwnedCollection {
    role: String,
    owner: Option<EntityRef>,
}

impl OwnedCollection {
    pub fn new(role: impl Into<String>, owner: EntityRef) -> Self {
        Self {
            role: role.into(),
            owner: Some(owner),
        }
    }

    /// A collection that has been detached from its owner.
    pub fn detached(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            owner: None,
        }
    }
}

impl PersistentCollection for OwnedCollection {
    fn role(&self) -> &str {
        &self.role
    }

    fn owner(&self) -> Option<EntityRef> {
        self.owner.clone()
    }
}

/// Identity-keyed wrapper so the same allocation collapses in a set.
#[derive(Clone)]
pub(crate) struct EntityKey(pub(crate) EntityRef);

impl EntityKey {
    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0) as *const ()
    }
}

impl PartialEq for EntityKey {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.addr(), other.addr())
    }
}

impl Eq for EntityKey {}

impl Hash for EntityKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EntityKey").field(&self.0).finish()
    }
}
