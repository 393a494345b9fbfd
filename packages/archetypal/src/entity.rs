//! Entity handles and the locations which back them.

use std::cmp::Ordering;
use std::fmt::{self, Debug, Formatter};
use std::hash::{Hash, Hasher};

use bytemuck::{Pod, Zeroable};

use crate::component::{Component, ComponentTypeID};

/// The stable identity of one entity.
pub type EntityId = u64;

/// A handle to a single entity.
///
/// Only `id` takes part in comparisons. `index` is the slot in the engine's
/// location table and is re-validated against that table on every use.
///
/// Every chunk stores the handle of each of its entities in column 0.
#[derive(Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Entity {
    id: EntityId,
    index: u64,
}

unsafe impl Component for Entity {
    fn type_id() -> ComponentTypeID {
        ComponentTypeID::new(0)
    }
}

impl Entity {
    /// Create a new handle from its parts.
    pub(crate) fn new(id: EntityId, index: usize) -> Entity {
        Entity {
            id,
            index: index as u64,
        }
    }

    /// Return the unique ID of this entity.
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Return the location table slot of this entity.
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Entity) -> bool {
        self.id == other.id
    }
}

impl Eq for Entity {}

impl PartialOrd for Entity {
    fn partial_cmp(&self, other: &Entity) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entity {
    fn cmp(&self, other: &Entity) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl Debug for Entity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}@{})", self.id, self.index)
    }
}

/// Where the data of a live entity is currently stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    pub archetype: usize,
    pub chunk: usize,
    pub slot: usize,
    pub entity_id: EntityId,
}
