//! # Archetype storage
//!
//! An [`Archetype`] owns the columnar data of every record sharing one exact
//! [`ArchetypeKey`]: one [`ErasedHeap`] per field type plus a parallel id
//! column.
//!
//! ## Layout
//! - Columns are ordered by ascending [`ComponentID`]; `component_ids[i]` is
//!   the field type of `heaps[i]`.
//! - Slot `n` of every column and of `entity_ids` belongs to the same record.
//! - Tags have no column; they only participate in the key.
//!
//! ## Operations
//! - `insert` appends a full row in `O(1)`.
//! - `remove_at` swap-removes a row in `O(1)` and reports which record moved
//!   into the vacated slot so the caller can fix its location table.
//! - `move_row_to` transfers a row to another archetype: shared columns move
//!   their value, source-only columns drop it, destination-only columns
//!   receive the supplied value.
//!
//! ## Invariants
//! - All columns and `entity_ids` have identical length.
//! - Archetypes are never destroyed; an archetype that becomes empty is kept
//!   for reuse and skipped by enumeration.

use std::any::Any;

use smallvec::SmallVec;

use crate::engine::component::{component_name, make_empty_heap, Bundle};
use crate::engine::error::{EntityError, QueryError, StoreError, StoreResult};
use crate::engine::entity::Entity;
use crate::engine::storage::{downcast_heap, ErasedHeap, Heap, HeapMut};
use crate::engine::types::{ArchetypeID, ArchetypeKey, ComponentID, EntityID, Signature, Tags};

/// Outcome of moving one row between archetypes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RowMove {
    /// Slot of the moved record in the destination.
    pub destination_row: usize,
    /// Record that was swapped into the vacated source slot, if any.
    pub displaced: Option<EntityID>,
}

/// Stores records that share an identical field-type set and tag set.
///
/// ## Invariants
/// - `heaps.len() == component_ids.len()`.
/// - Every heap has `entity_ids.len()` values.

pub struct Archetype {
    archetype_id: ArchetypeID,
    key: ArchetypeKey,
    component_ids: SmallVec<[ComponentID; 8]>,
    heaps: Vec<Box<dyn ErasedHeap>>,
    entity_ids: Vec<EntityID>,
}

impl std::fmt::Debug for Archetype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archetype")
            .field("archetype_id", &self.archetype_id)
            .field("components", &self.key.components)
            .field("tags", &self.key.tags)
            .field("length", &self.entity_ids.len())
            .finish()
    }
}

impl Archetype {
    /// Creates an empty archetype with one column per field type in `key`.
    ///
    /// ## Errors
    /// Fails if a field type in the key is not registered.

    pub fn new(archetype_id: ArchetypeID, key: ArchetypeKey, initial_capacity: usize) -> StoreResult<Self> {
        let component_ids: SmallVec<[ComponentID; 8]> = key.components.iter().collect();
        let mut heaps = Vec::with_capacity(component_ids.len());
        for &component_id in &component_ids {
            let mut heap = make_empty_heap(component_id)?;
            heap.reserve(initial_capacity);
            heaps.push(heap);
        }
        Ok(Self {
            archetype_id,
            key,
            component_ids,
            heaps,
            entity_ids: Vec::with_capacity(initial_capacity),
        })
    }

    /// Position of this archetype in the store's archetype table.
    #[inline]
    pub fn archetype_id(&self) -> ArchetypeID {
        self.archetype_id
    }

    /// Field-type signature and tags identifying this archetype.
    #[inline]
    pub fn key(&self) -> &ArchetypeKey {
        &self.key
    }

    /// Field types stored in this archetype.
    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.key.components
    }

    /// Tags shared by every record in this archetype.
    #[inline]
    pub fn tags(&self) -> &Tags {
        &self.key.tags
    }

    /// Number of records.
    #[inline]
    pub fn len(&self) -> usize {
        self.entity_ids.len()
    }

    /// Returns `true` when no record is stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entity_ids.is_empty()
    }

    /// Id column, aligned with every heap.
    #[inline]
    pub fn entity_ids(&self) -> &[EntityID] {
        &self.entity_ids
    }

    /// Field types of the columns, ascending.
    #[inline]
    pub fn component_ids(&self) -> &[ComponentID] {
        &self.component_ids
    }

    /// Returns `true` if this archetype stores a column for `component_id`.
    #[inline]
    pub fn has_component(&self, component_id: ComponentID) -> bool {
        self.key.components.has(component_id)
    }

    #[inline]
    fn column(&self, component_id: ComponentID) -> Option<usize> {
        self.component_ids.binary_search(&component_id).ok()
    }

    /// Type-erased column of `component_id`.
    pub fn erased_heap(&self, component_id: ComponentID) -> Option<&dyn ErasedHeap> {
        self.column(component_id).map(|i| self.heaps[i].as_ref())
    }

    /// Typed column of `component_id`.
    pub fn heap<T: Send + Sync + 'static>(&self, component_id: ComponentID) -> StoreResult<&Heap<T>> {
        let column = self.column(component_id).ok_or_else(|| self.missing(component_id))?;
        downcast_heap::<T>(self.heaps[column].as_ref())
    }

    /// Mutable typed column of `component_id`.
    pub fn heap_mut<T: Send + Sync + 'static>(&mut self, component_id: ComponentID) -> StoreResult<&mut Heap<T>> {
        let column = self.column(component_id).ok_or_else(|| self.missing(component_id))?;
        let heap: HeapMut<'_> = self.heaps[column].as_mut();
        crate::engine::storage::downcast_heap_mut::<T>(Some(heap))
    }

    fn missing(&self, component_id: ComponentID) -> StoreError {
        StoreError::Internal(format!(
            "archetype {} has no column for `{}`",
            self.archetype_id,
            component_name(component_id)
        ))
    }

    /// Borrows several distinct columns mutably, in the order of `ids`,
    /// together with the id column.
    ///
    /// ## Errors
    /// - A requested field type has no column here.
    /// - [`QueryError::DuplicateComponent`] if `ids` repeats a field type.

    pub fn heaps_many_mut(&mut self, ids: &[ComponentID]) -> StoreResult<(Vec<HeapMut<'_>>, &[EntityID])> {
        let mut slots: SmallVec<[Option<HeapMut<'_>>; 8]> =
            self.heaps.iter_mut().map(|heap| Some(heap.as_mut())).collect();
        let mut borrowed = Vec::with_capacity(ids.len());
        for &component_id in ids {
            let column = self.component_ids.binary_search(&component_id).map_err(|_| {
                StoreError::Internal(format!(
                    "archetype {} has no column for `{}`",
                    self.archetype_id,
                    component_name(component_id)
                ))
            })?;
            let heap = slots[column]
                .take()
                .ok_or(QueryError::DuplicateComponent { component: component_name(component_id) })?;
            borrowed.push(heap);
        }
        Ok((borrowed, &self.entity_ids))
    }

    /// Appends a row for record `id`, taking every column's value from `bundle`.
    ///
    /// ## Behavior
    /// On failure every value already pushed is removed again, leaving the
    /// archetype unchanged.
    ///
    /// ## Errors
    /// [`EntityError::MissingComponent`] if the bundle lacks a field type of
    /// this archetype.

    pub fn insert(&mut self, entity: Entity, bundle: &mut Bundle) -> StoreResult<usize> {
        let row = self.entity_ids.len();
        for column in 0..self.heaps.len() {
            let component_id = self.component_ids[column];
            let pushed = match bundle.take(component_id) {
                Some(value) => self.heaps[column].push_dyn(value).map_err(StoreError::from),
                None => Err(EntityError::MissingComponent {
                    entity,
                    component: component_name(component_id),
                }
                .into()),
            };
            if let Err(error) = pushed {
                for written in &mut self.heaps[..column] {
                    let _ = written.swap_remove_dyn(row);
                }
                return Err(error);
            }
        }
        self.entity_ids.push(entity.id);
        Ok(row)
    }

    /// Removes the row at `row` by swapping the last row into it.
    ///
    /// ## Returns
    /// The id of the record now occupying `row`, or `None` if `row` was last.

    pub fn remove_at(&mut self, row: usize) -> StoreResult<Option<EntityID>> {
        let length = self.entity_ids.len();
        if row >= length {
            return Err(crate::engine::error::HeapError::OutOfBounds { row, length }.into());
        }
        for heap in &mut self.heaps {
            heap.swap_remove_dyn(row)?;
        }
        self.entity_ids.swap_remove(row);
        Ok(self.entity_ids.get(row).copied())
    }

    /// Moves the record at `row` into `destination`.
    ///
    /// ## Behavior
    /// - Columns present in both archetypes transfer their value.
    /// - Columns only present here drop their value.
    /// - A column only present in `destination` receives `added`; at most one
    ///   such column may exist.
    ///
    /// ## Errors
    /// Internal error if `destination` needs a value that `added` does not
    /// provide.

    pub fn move_row_to(
        &mut self,
        destination: &mut Archetype,
        row: usize,
        mut added: Option<(ComponentID, Box<dyn Any + Send>)>,
    ) -> StoreResult<RowMove> {
        let length = self.entity_ids.len();
        if row >= length {
            return Err(crate::engine::error::HeapError::OutOfBounds { row, length }.into());
        }

        for (column, &component_id) in destination.component_ids.iter().enumerate() {
            if self.key.components.has(component_id) {
                continue;
            }
            match added.take() {
                Some((added_id, _)) if added_id != component_id => {
                    return Err(StoreError::Internal(format!(
                        "move_row_to: destination needs `{}`, got `{}`",
                        component_name(component_id),
                        component_name(added_id)
                    )));
                }
                Some((_, value)) => {
                    destination.heaps[column].push_dyn(value)?;
                }
                None => {
                    return Err(StoreError::Internal(format!(
                        "move_row_to: no value supplied for `{}`",
                        component_name(component_id)
                    )));
                }
            }
        }

        for (column, &component_id) in self.component_ids.iter().enumerate() {
            match destination.column(component_id) {
                Some(target) => {
                    destination.heaps[target].push_from_dyn(self.heaps[column].as_mut(), row)?;
                }
                None => {
                    self.heaps[column].swap_remove_dyn(row)?;
                }
            }
        }

        let id = self.entity_ids.swap_remove(row);
        destination.entity_ids.push(id);
        Ok(RowMove {
            destination_row: destination.entity_ids.len() - 1,
            displaced: self.entity_ids.get(row).copied(),
        })
    }
}

/// Borrows two distinct archetypes mutably.
pub(crate) fn archetype_pair_mut(
    archetypes: &mut [Archetype],
    first: ArchetypeID,
    second: ArchetypeID,
) -> StoreResult<(&mut Archetype, &mut Archetype)> {
    let (a, b) = (first as usize, second as usize);
    if a == b || a >= archetypes.len() || b >= archetypes.len() {
        return Err(StoreError::Internal(format!("invalid archetype pair ({first}, {second})")));
    }
    if a < b {
        let (left, right) = archetypes.split_at_mut(b);
        Ok((&mut left[a], &mut right[0]))
    } else {
        let (left, right) = archetypes.split_at_mut(a);
        Ok((&mut right[0], &mut left[b]))
    }
}
