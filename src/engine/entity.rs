//! Entity handles and the id/revision/location table.
//!
//! Ids are recycled through a free list; every release bumps the id's
//! revision so handles issued before the release no longer resolve.

use std::fmt;

use crate::engine::error::EntityError;
use crate::engine::types::{ArchetypeID, EntityID, Revision};

/// Handle to a record: id plus the revision the id had when it was issued.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct Entity {
    /// Record id.
    pub id: EntityID,
    /// Revision at issue time.
    pub revision: Revision,
}

impl Entity {
    /// The null handle. Never alive.
    pub const NULL: Entity = Entity { id: 0, revision: 0 };

    /// Handle from raw parts.
    #[inline]
    pub fn new(id: EntityID, revision: Revision) -> Self {
        Self { id, revision }
    }

    /// Returns `true` for the reserved null handle.
    #[inline]
    pub fn is_null(self) -> bool {
        self.id == 0
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.revision)
    }
}

/// Archetype and slot currently holding a record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntityLocation {
    /// Archetype holding the record.
    pub archetype: ArchetypeID,
    /// Slot of the record inside the archetype.
    pub row: usize,
}

impl EntityLocation {
    /// Location from raw parts.
    #[inline]
    pub fn new(archetype: ArchetypeID, row: usize) -> Self {
        Self { archetype, row }
    }
}

/// Id-indexed table of revisions, liveness and locations.
///
/// ## Invariants
/// - Slot `0` is reserved and never alive.
/// - An id is on `free_store` only while it is not alive, and only after its
///   revision was bumped by [`release`](Self::release).

#[derive(Debug)]
pub struct EntityNodes {
    revisions: Vec<Revision>,
    alive: Vec<bool>,
    locations: Vec<EntityLocation>,
    free_store: Vec<EntityID>,
    alive_count: usize,
}

impl Default for EntityNodes {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl EntityNodes {
    /// Table with room for `capacity` ids.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut revisions = Vec::with_capacity(capacity + 1);
        let mut alive = Vec::with_capacity(capacity + 1);
        let mut locations = Vec::with_capacity(capacity + 1);
        revisions.push(0);
        alive.push(false);
        locations.push(EntityLocation::default());
        Self { revisions, alive, locations, free_store: Vec::new(), alive_count: 0 }
    }

    /// Number of alive records.
    #[inline]
    pub fn alive_count(&self) -> usize {
        self.alive_count
    }

    fn grow_to(&mut self, len: usize) {
        if len > self.revisions.len() {
            self.revisions.resize(len, 0);
            self.alive.resize(len, false);
            self.locations.resize(len, EntityLocation::default());
        }
    }

    /// Issues a handle, reusing a released id when one is available.
    pub fn allocate(&mut self, location: EntityLocation) -> Result<Entity, EntityError> {
        let id = match self.free_store.pop() {
            Some(id) => id,
            None => {
                let next = self.revisions.len();
                if next > EntityID::MAX as usize {
                    return Err(EntityError::InvalidId { id: next as u64 });
                }
                self.grow_to(next + 1);
                next as EntityID
            }
        };
        Ok(self.mark_alive(id, location))
    }

    /// Issues a handle for a caller-chosen id.
    pub fn claim(&mut self, id: EntityID, location: EntityLocation) -> Result<Entity, EntityError> {
        if id == 0 {
            return Err(EntityError::InvalidId { id: 0 });
        }
        let index = id as usize;
        if index < self.alive.len() && self.alive[index] {
            return Err(EntityError::IdInUse { id });
        }
        self.grow_to(index + 1);
        if let Some(position) = self.free_store.iter().position(|free| *free == id) {
            self.free_store.swap_remove(position);
        }
        Ok(self.mark_alive(id, location))
    }

    fn mark_alive(&mut self, id: EntityID, location: EntityLocation) -> Entity {
        let index = id as usize;
        self.alive[index] = true;
        self.locations[index] = location;
        self.alive_count += 1;
        Entity::new(id, self.revisions[index])
    }

    /// Bumps the revision and returns the id to the free list.
    pub fn release(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let index = entity.id as usize;
        self.revisions[index] = self.revisions[index].wrapping_add(1);
        self.alive[index] = false;
        self.locations[index] = EntityLocation::default();
        self.free_store.push(entity.id);
        self.alive_count -= 1;
        true
    }

    /// Returns `true` if `entity` is alive and its revision is current.
    pub fn is_alive(&self, entity: Entity) -> bool {
        let index = entity.id as usize;
        index != 0
            && self.alive.get(index).copied().unwrap_or(false)
            && self.revisions[index] == entity.revision
    }

    /// Location of a live handle; stale handles are an error.
    pub fn location(&self, entity: Entity) -> Result<EntityLocation, EntityError> {
        if self.is_alive(entity) {
            Ok(self.locations[entity.id as usize])
        } else {
            Err(EntityError::Stale { entity })
        }
    }

    /// Location of an alive id regardless of revision.
    pub fn location_of_id(&self, id: EntityID) -> Option<EntityLocation> {
        let index = id as usize;
        if index != 0 && self.alive.get(index).copied().unwrap_or(false) {
            Some(self.locations[index])
        } else {
            None
        }
    }

    /// Current handle for an alive id.
    pub fn entity_of(&self, id: EntityID) -> Option<Entity> {
        self.location_of_id(id).map(|_| Entity::new(id, self.revisions[id as usize]))
    }

    /// Current handle for an id known to be alive, e.g. read from an id column.
    #[inline]
    pub fn resolve(&self, id: EntityID) -> Entity {
        let revision = self.revisions.get(id as usize).copied().unwrap_or(0);
        Entity::new(id, revision)
    }

    /// Records the new location of a live id.
    pub fn set_location(&mut self, id: EntityID, location: EntityLocation) {
        let index = id as usize;
        debug_assert!(
            self.alive.get(index).copied().unwrap_or(false),
            "set_location was called on a dead id. Id: {id}, Location: {location:?}"
        );
        if index < self.locations.len() {
            self.locations[index] = location;
        }
    }
}
