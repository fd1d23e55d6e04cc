//! # Entity Store
//!
//! [`EntityStore`] is the owner of all records of one store instance: the
//! archetype table, the record location table and the value indices.
//!
//! ## Purpose
//! Every structural change (creating and deleting records, adding and removing
//! fields or tags) goes through the store, which keeps three structures in
//! lockstep:
//! - the archetype holding each record and the record's slot in it,
//! - the [`EntityNodes`] location table,
//! - the value index of every indexed field type.
//!
//! ## Index maintenance
//! An index is created the first time a record receives its field type (or on
//! the first [`component_index`](EntityStore::component_index) call) and is
//! backfilled from existing records at that point. From then on every add,
//! update, removal and deletion updates it synchronously, reading values
//! straight out of the archetype columns.
//!
//! ## Deletion protocol
//! [`delete_entity`](EntityStore::delete_entity) runs, in order:
//! 1. verification that every indexed field value of the record is present in
//!    its index under the record's id,
//! 2. cascading detachment of every link field that references the record,
//! 3. retraction of the record's own index entries,
//! 4. swap-removal from its archetype and location fix-up of the moved record,
//! 5. revision bump of the id.
//!
//! A failed verification aborts the delete before anything is modified.
//!
//! ## Structural-change safety
//! While a [`LoopGuard`] of this store is alive, every structural operation
//! fails with [`StoreError::StructuralChangeDuringIteration`]. Field value
//! updates are not structural and remain allowed.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::engine::archetype::{archetype_pair_mut, Archetype};
use crate::engine::chunks::{LoopCounter, LoopGuard};
use crate::engine::component::{
    component_desc, component_id_of, component_name, make_index, tag_id_of, Bundle, Component,
    ComponentDesc, DISABLED_TAG,
};
use crate::engine::config::StoreConfig;
use crate::engine::entity::{Entity, EntityLocation, EntityNodes};
use crate::engine::error::{EntityError, HeapError, QueryError, RegistryError, StoreError, StoreResult};
use crate::engine::index::{EntityIds, EntityIndex, ErasedIndex, IndexedComponent, TypedIndex};
use crate::engine::query::{Query, QueryData};
use crate::engine::types::{ArchetypeID, ArchetypeKey, ComponentID, EntityID, TagID};

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Receives the field values of one record, in ascending field-type order.
///
/// This is the read path used by external writers (e.g. serializers); values
/// are read from the same columns queries iterate.

pub trait ComponentVisitor {
    /// Called once per field the record carries.
    fn visit(&mut self, desc: &ComponentDesc, value: &dyn Any) -> StoreResult<()>;
}

/// In-memory archetype store with value indices.
pub struct EntityStore {
    store_id: u64,
    config: StoreConfig,
    archetypes: Vec<Archetype>,
    archetype_map: FxHashMap<ArchetypeKey, ArchetypeID>,
    entities: EntityNodes,
    indexes: FxHashMap<ComponentID, Box<dyn ErasedIndex>>,
    loops: LoopCounter,
}

impl fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityStore")
            .field("store_id", &self.store_id)
            .field("archetypes", &self.archetypes.len())
            .field("entities", &self.entities.alive_count())
            .field("indexes", &self.indexes.len())
            .field("active_loops", &self.loops.active())
            .finish()
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

fn missing_column(archetype: ArchetypeID, component_id: ComponentID) -> StoreError {
    StoreError::Internal(format!(
        "archetype {archetype} has no column for `{}`",
        component_name(component_id)
    ))
}

impl EntityStore {
    /// Empty store with default configuration.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Empty store sized and tuned by `config`.
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            store_id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
            config,
            archetypes: Vec::new(),
            archetype_map: FxHashMap::default(),
            entities: EntityNodes::with_capacity(config.initial_entity_capacity),
            indexes: FxHashMap::default(),
            loops: LoopCounter::default(),
        }
    }

    /// Settings this store was created with.
    #[inline]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Process-unique id of this store instance.
    #[inline]
    pub fn store_id(&self) -> u64 {
        self.store_id
    }

    /// All archetypes in creation order, including empty ones.
    #[inline]
    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    /// Archetype with id `archetype_id`.
    #[inline]
    pub fn archetype(&self, archetype_id: ArchetypeID) -> Option<&Archetype> {
        self.archetypes.get(archetype_id as usize)
    }

    /// Number of archetypes, including empty ones.
    #[inline]
    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    /// Id, revision and location table.
    #[inline]
    pub fn entity_nodes(&self) -> &EntityNodes {
        &self.entities
    }

    /// Mutable archetypes alongside the location table, for carving columns.
    pub(crate) fn split_for_iteration(&mut self) -> (&mut [Archetype], &EntityNodes) {
        (&mut self.archetypes, &self.entities)
    }

    /// Marks a loop as active until the returned guard is dropped.
    ///
    /// The guard does not borrow the store, so it can be held across calls
    /// that need `&mut self`; those calls fail if they are structural.

    pub fn begin_loop(&self) -> LoopGuard {
        self.loops.acquire()
    }

    /// Number of live loop guards.
    #[inline]
    pub fn active_loops(&self) -> usize {
        self.loops.active()
    }

    fn ensure_no_active_loops(&self) -> StoreResult<()> {
        match self.loops.active() {
            0 => Ok(()),
            active => Err(StoreError::StructuralChangeDuringIteration { active }),
        }
    }

    /// Starts a query over field types `D`, bound to this store.
    pub fn query<D: QueryData>(&self) -> StoreResult<Query<D>> {
        Query::new(self.store_id)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Records
    // ─────────────────────────────────────────────────────────────────────

    /// Creates a record without fields.
    pub fn create_entity(&mut self) -> StoreResult<Entity> {
        self.ensure_no_active_loops()?;
        self.place(Bundle::new(), None)
    }

    /// Creates a record with a caller-chosen id.
    ///
    /// ## Errors
    /// - [`EntityError::IdInUse`] if `id` is alive.
    /// - [`EntityError::InvalidId`] for the reserved id `0`.

    pub fn create_entity_with_id(&mut self, id: EntityID) -> StoreResult<Entity> {
        self.ensure_no_active_loops()?;
        self.place(Bundle::new(), Some(id))
    }

    /// Creates a record directly in the archetype of `bundle`'s field types.
    pub fn create_entity_with(&mut self, bundle: Bundle) -> StoreResult<Entity> {
        self.ensure_no_active_loops()?;
        self.place(bundle, None)
    }

    fn place(&mut self, mut bundle: Bundle, id: Option<EntityID>) -> StoreResult<Entity> {
        for (component_id, value) in bundle.values() {
            self.check_link_target(component_id, value)?;
        }
        let key = ArchetypeKey::new(bundle.signature(), Default::default());
        let archetype_id = self.get_or_create_archetype(key)?;
        let row = self.archetypes[archetype_id as usize].len();
        let location = EntityLocation::new(archetype_id, row);
        let entity = match id {
            Some(id) => self.entities.claim(id, location)?,
            None => self.entities.allocate(location)?,
        };
        if let Err(error) = self.archetypes[archetype_id as usize].insert(entity, &mut bundle) {
            self.entities.release(entity);
            return Err(error);
        }
        self.index_row(entity.id, location)?;
        Ok(entity)
    }

    /// Returns `true` if `entity` is alive and its revision is current.
    #[inline]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    /// Number of alive records.
    #[inline]
    pub fn entity_count(&self) -> usize {
        self.entities.alive_count()
    }

    /// Current handle of an alive id.
    #[inline]
    pub fn entity_by_id(&self, id: EntityID) -> Option<Entity> {
        self.entities.entity_of(id)
    }

    /// Archetype and slot of a live record.
    pub fn location(&self, entity: Entity) -> StoreResult<EntityLocation> {
        Ok(self.entities.location(entity)?)
    }

    /// Deletes a record and every index entry and incoming link touching it.
    ///
    /// ## Errors
    /// - [`EntityError::Stale`] for a dead or null handle.
    /// - [`IndexError::ValueNotFound`](crate::engine::error::IndexError::ValueNotFound)
    ///   if an indexed field of the record was mutated without index
    ///   maintenance; the record is left untouched.
    /// - [`StoreError::StructuralChangeDuringIteration`] while loops are active.

    pub fn delete_entity(&mut self, entity: Entity) -> StoreResult<()> {
        self.ensure_no_active_loops()?;
        let location = self.entities.location(entity)?;

        let archetype = &self.archetypes[location.archetype as usize];
        for &component_id in archetype.component_ids() {
            let Some(index) = self.indexes.get(&component_id) else {
                continue;
            };
            let heap = archetype
                .erased_heap(component_id)
                .ok_or_else(|| missing_column(location.archetype, component_id))?;
            if let Err(error) = index.verify_from_heap(entity.id, heap, location.row) {
                warn!(
                    entity = %entity,
                    component = index.component_name(),
                    "indexed value changed outside index maintenance; delete aborted"
                );
                return Err(error);
            }
        }

        let mut referencing: Vec<(EntityID, ComponentID)> = self
            .indexes
            .iter()
            .filter(|(_, index)| index.is_link_index())
            .flat_map(|(&component_id, index)| {
                index.incoming_links(entity.id).iter().map(move |&id| (id, component_id))
            })
            .filter(|&(id, _)| id != entity.id)
            .collect();
        referencing.sort_unstable();
        for &(id, component_id) in &referencing {
            if let Err(error) = self.verify_indexed(id, component_id) {
                warn!(
                    entity = %entity,
                    source = id,
                    component = component_name(component_id),
                    "link changed outside index maintenance; delete aborted"
                );
                return Err(error);
            }
        }
        for (id, component_id) in referencing {
            let Some(source) = self.entities.entity_of(id) else {
                continue;
            };
            debug!(
                source = %source,
                target = %entity,
                component = component_name(component_id),
                "detaching link to deleted entity"
            );
            self.detach_component(source, component_id)?;
        }

        // Detaching may have swap-moved the record inside its archetype.
        let location = self.entities.location(entity)?;
        let archetype = &self.archetypes[location.archetype as usize];
        for &component_id in archetype.component_ids() {
            let Some(index) = self.indexes.get_mut(&component_id) else {
                continue;
            };
            let heap = archetype
                .erased_heap(component_id)
                .ok_or_else(|| missing_column(location.archetype, component_id))?;
            index.remove_from_heap(entity.id, heap, location.row)?;
        }

        if let Some(moved) = self.archetypes[location.archetype as usize].remove_at(location.row)? {
            self.entities.set_location(moved, location);
        }
        self.entities.release(entity);
        debug!(entity = %entity, archetype = location.archetype, "deleted entity");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Fields
    // ─────────────────────────────────────────────────────────────────────

    /// Adds field `T` to a record, or updates it in place if already present.
    ///
    /// ## Behavior
    /// - Absent field: the record moves to the archetype with `T` added.
    ///   Structural; rejected while loops are active.
    /// - Present field: same as [`set_component`](Self::set_component).
    ///
    /// ## Errors
    /// [`EntityError::Stale`] if `T` is a link field whose target is not alive.

    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> StoreResult<()> {
        let component_id = component_id_of::<T>()?;
        let location = self.entities.location(entity)?;
        self.check_link_target(component_id, &value)?;
        let key = *self.archetypes[location.archetype as usize].key();
        if key.components.has(component_id) {
            return self.update_in_place(entity, component_id, location, value);
        }

        self.ensure_no_active_loops()?;
        let destination = ArchetypeKey::new(key.components.with(component_id), key.tags);
        let value: Box<dyn Any + Send> = Box::new(value);
        let location = self.move_entity(entity.id, location, destination, Some((component_id, value)))?;
        self.index_field(entity.id, component_id, location)
    }

    /// Replaces the value of field `T`, moving the record between index
    /// buckets when `T` is indexed.
    ///
    /// ## Errors
    /// - [`EntityError::MissingComponent`] if the record lacks `T`.
    /// - [`EntityError::Stale`] if `T` is a link field whose target is not alive.
    /// - [`IndexError::ValueNotFound`](crate::engine::error::IndexError::ValueNotFound)
    ///   if the old value was mutated without index maintenance.

    pub fn set_component<T: Component>(&mut self, entity: Entity, value: T) -> StoreResult<()> {
        let component_id = component_id_of::<T>()?;
        let location = self.entities.location(entity)?;
        if !self.archetypes[location.archetype as usize].has_component(component_id) {
            return Err(EntityError::MissingComponent { entity, component: component_name(component_id) }.into());
        }
        self.check_link_target(component_id, &value)?;
        self.update_in_place(entity, component_id, location, value)
    }

    fn update_in_place<T: Component>(
        &mut self,
        entity: Entity,
        component_id: ComponentID,
        location: EntityLocation,
        value: T,
    ) -> StoreResult<()> {
        let indexed = self.ensure_index(component_id)?;
        let archetype = &mut self.archetypes[location.archetype as usize];
        if indexed {
            let heap = archetype
                .erased_heap(component_id)
                .ok_or_else(|| missing_column(location.archetype, component_id))?;
            if let Some(index) = self.indexes.get_mut(&component_id) {
                index.remove_from_heap(entity.id, heap, location.row)?;
            }
        }

        let heap = archetype.heap_mut::<T>(component_id)?;
        let length = heap.len();
        let slot = heap
            .get_mut(location.row)
            .ok_or(HeapError::OutOfBounds { row: location.row, length })?;
        *slot = value;

        if indexed {
            self.index_field(entity.id, component_id, location)?;
        }
        Ok(())
    }

    /// Removes field `T`; returns `false` if the record did not have it.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> StoreResult<bool> {
        let component_id = component_id_of::<T>()?;
        self.remove_component_by_id(entity, component_id)
    }

    /// Untyped form of [`remove_component`](Self::remove_component).
    pub fn remove_component_by_id(&mut self, entity: Entity, component_id: ComponentID) -> StoreResult<bool> {
        self.ensure_no_active_loops()?;
        self.detach_component(entity, component_id)
    }

    fn detach_component(&mut self, entity: Entity, component_id: ComponentID) -> StoreResult<bool> {
        let location = self.entities.location(entity)?;
        let key = *self.archetypes[location.archetype as usize].key();
        if !key.components.has(component_id) {
            return Ok(false);
        }
        if self.ensure_index(component_id)? {
            let archetype = &self.archetypes[location.archetype as usize];
            let heap = archetype
                .erased_heap(component_id)
                .ok_or_else(|| missing_column(location.archetype, component_id))?;
            if let Some(index) = self.indexes.get_mut(&component_id) {
                index.remove_from_heap(entity.id, heap, location.row)?;
            }
        }
        let destination = ArchetypeKey::new(key.components.without(component_id), key.tags);
        self.move_entity(entity.id, location, destination, None)?;
        Ok(true)
    }

    /// Returns `true` if the record has field `T`.
    pub fn has_component<T: Component>(&self, entity: Entity) -> StoreResult<bool> {
        let component_id = component_id_of::<T>()?;
        let location = self.entities.location(entity)?;
        Ok(self.archetypes[location.archetype as usize].has_component(component_id))
    }

    /// Shared reference to field `T` of a record.
    pub fn get_component<T: Component>(&self, entity: Entity) -> StoreResult<&T> {
        let component_id = component_id_of::<T>()?;
        let location = self.entities.location(entity)?;
        let archetype = &self.archetypes[location.archetype as usize];
        if !archetype.has_component(component_id) {
            return Err(EntityError::MissingComponent { entity, component: component_name(component_id) }.into());
        }
        let heap = archetype.heap::<T>(component_id)?;
        heap.get(location.row)
            .ok_or_else(|| HeapError::OutOfBounds { row: location.row, length: heap.len() }.into())
    }

    /// Mutable reference to field `T` of a record.
    ///
    /// Writes through this reference bypass index maintenance. Changing an
    /// indexed value this way is detected on the next index operation
    /// touching the record and reported as a consistency violation.

    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> StoreResult<&mut T> {
        let component_id = component_id_of::<T>()?;
        let location = self.entities.location(entity)?;
        let archetype = &mut self.archetypes[location.archetype as usize];
        if !archetype.has_component(component_id) {
            return Err(EntityError::MissingComponent { entity, component: component_name(component_id) }.into());
        }
        let heap = archetype.heap_mut::<T>(component_id)?;
        let length = heap.len();
        heap.get_mut(location.row)
            .ok_or_else(|| HeapError::OutOfBounds { row: location.row, length }.into())
    }

    /// Feeds every field of a record to `visitor`.
    pub fn visit_components<V>(&self, entity: Entity, visitor: &mut V) -> StoreResult<()>
    where
        V: ComponentVisitor + ?Sized,
    {
        let location = self.entities.location(entity)?;
        let archetype = &self.archetypes[location.archetype as usize];
        for &component_id in archetype.component_ids() {
            let desc = component_desc(component_id)
                .ok_or(RegistryError::UnregisteredComponent { name: "<unknown component id>" })?;
            let heap = archetype
                .erased_heap(component_id)
                .ok_or_else(|| missing_column(location.archetype, component_id))?;
            let value = heap
                .get_dyn(location.row)
                .ok_or(HeapError::OutOfBounds { row: location.row, length: heap.len() })?;
            visitor.visit(&desc, value)?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Tags
    // ─────────────────────────────────────────────────────────────────────

    /// Adds tag `T`; returns `false` if the record already had it.
    pub fn add_tag<T: 'static>(&mut self, entity: Entity) -> StoreResult<bool> {
        let tag_id = tag_id_of::<T>()?;
        self.set_tag(entity, tag_id, true)
    }

    /// Removes tag `T`; returns `false` if the record did not have it.
    pub fn remove_tag<T: 'static>(&mut self, entity: Entity) -> StoreResult<bool> {
        let tag_id = tag_id_of::<T>()?;
        self.set_tag(entity, tag_id, false)
    }

    /// Returns `true` if the record has tag `T`.
    pub fn has_tag<T: 'static>(&self, entity: Entity) -> StoreResult<bool> {
        let tag_id = tag_id_of::<T>()?;
        let location = self.entities.location(entity)?;
        Ok(self.archetypes[location.archetype as usize].tags().has(tag_id))
    }

    /// Hides a record from queries that do not ask for disabled records.
    pub fn disable(&mut self, entity: Entity) -> StoreResult<bool> {
        self.set_tag(entity, DISABLED_TAG, true)
    }

    /// Makes a disabled record visible to queries again.
    pub fn enable(&mut self, entity: Entity) -> StoreResult<bool> {
        self.set_tag(entity, DISABLED_TAG, false)
    }

    /// Returns `true` if the record carries the `Disabled` tag.
    pub fn is_disabled(&self, entity: Entity) -> StoreResult<bool> {
        let location = self.entities.location(entity)?;
        Ok(self.archetypes[location.archetype as usize].tags().has(DISABLED_TAG))
    }

    fn set_tag(&mut self, entity: Entity, tag_id: TagID, present: bool) -> StoreResult<bool> {
        self.ensure_no_active_loops()?;
        let location = self.entities.location(entity)?;
        let key = *self.archetypes[location.archetype as usize].key();
        if key.tags.has(tag_id) == present {
            return Ok(false);
        }
        let tags = if present { key.tags.with(tag_id) } else { key.tags.without(tag_id) };
        self.move_entity(entity.id, location, ArchetypeKey::new(key.components, tags), None)?;
        Ok(true)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Indexes
    // ─────────────────────────────────────────────────────────────────────

    /// Value index of `C`, created and backfilled on first use.
    ///
    /// ## Errors
    /// [`QueryError::NotIndexed`] if `C` was registered without an index.

    pub fn component_index<C: IndexedComponent>(&mut self) -> StoreResult<&C::Index> {
        let component_id = component_id_of::<C>()?;
        if !self.ensure_index(component_id)? {
            return Err(QueryError::NotIndexed { component: component_name(component_id) }.into());
        }
        self.indexes
            .get(&component_id)
            .and_then(|index| index.as_any().downcast_ref::<TypedIndex<C>>())
            .map(TypedIndex::index)
            .ok_or_else(|| StoreError::Internal(format!("index of `{}` has the wrong type", component_name(component_id))))
    }

    /// Value index of `C` if it has been created.
    pub fn try_index<C: IndexedComponent>(&self) -> Option<&C::Index> {
        let component_id = component_id_of::<C>().ok()?;
        self.indexes
            .get(&component_id)
            .and_then(|index| index.as_any().downcast_ref::<TypedIndex<C>>())
            .map(TypedIndex::index)
    }

    /// Ids of the records whose link field `C` references `target`.
    pub fn incoming_links<C>(&mut self, target: Entity) -> StoreResult<EntityIds<'_>>
    where
        C: IndexedComponent<Value = Entity, Index = EntityIndex>,
    {
        Ok(self.component_index::<C>()?.links_to(target.id))
    }

    /// Rejects a link field value whose target is dead or stale.
    fn check_link_target(&mut self, component_id: ComponentID, value: &dyn Any) -> StoreResult<()> {
        if !self.ensure_index(component_id)? {
            return Ok(());
        }
        let target = self
            .indexes
            .get(&component_id)
            .filter(|index| index.is_link_index())
            .and_then(|index| index.link_target_of(value));
        match target {
            Some(target) if !self.entities.is_alive(target) => Err(EntityError::Stale { entity: target }.into()),
            _ => Ok(()),
        }
    }

    /// Checks that record `id`'s value of `component_id` sits in its index.
    fn verify_indexed(&self, id: EntityID, component_id: ComponentID) -> StoreResult<()> {
        let (Some(index), Some(location)) = (self.indexes.get(&component_id), self.entities.location_of_id(id)) else {
            return Ok(());
        };
        let heap = self.archetypes[location.archetype as usize]
            .erased_heap(component_id)
            .ok_or_else(|| missing_column(location.archetype, component_id))?;
        index.verify_from_heap(id, heap, location.row)
    }

    /// Creates the index of `component_id` if the type is indexed and the
    /// index does not exist yet. Returns whether the type is indexed.
    fn ensure_index(&mut self, component_id: ComponentID) -> StoreResult<bool> {
        if self.indexes.contains_key(&component_id) {
            return Ok(true);
        }
        let Some(mut index) = make_index(component_id) else {
            return Ok(false);
        };
        let mut backfilled = 0usize;
        for archetype in self.archetypes.iter().filter(|a| a.has_component(component_id)) {
            let heap = archetype
                .erased_heap(component_id)
                .ok_or_else(|| missing_column(archetype.archetype_id(), component_id))?;
            for (row, &id) in archetype.entity_ids().iter().enumerate() {
                index.add_from_heap(id, heap, row)?;
                backfilled += 1;
            }
        }
        debug!(component = index.component_name(), backfilled, "created value index");
        self.indexes.insert(component_id, index);
        Ok(true)
    }

    fn index_field(&mut self, id: EntityID, component_id: ComponentID, location: EntityLocation) -> StoreResult<()> {
        if !self.ensure_index(component_id)? {
            return Ok(());
        }
        let heap = self.archetypes[location.archetype as usize]
            .erased_heap(component_id)
            .ok_or_else(|| missing_column(location.archetype, component_id))?;
        match self.indexes.get_mut(&component_id) {
            Some(index) => index.add_from_heap(id, heap, location.row),
            None => Ok(()),
        }
    }

    fn index_row(&mut self, id: EntityID, location: EntityLocation) -> StoreResult<()> {
        let component_ids: SmallVec<[ComponentID; 8]> =
            self.archetypes[location.archetype as usize].component_ids().iter().copied().collect();
        for component_id in component_ids {
            self.index_field(id, component_id, location)?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Archetypes
    // ─────────────────────────────────────────────────────────────────────

    fn get_or_create_archetype(&mut self, key: ArchetypeKey) -> StoreResult<ArchetypeID> {
        if let Some(&archetype_id) = self.archetype_map.get(&key) {
            return Ok(archetype_id);
        }
        let archetype_id = self.archetypes.len() as ArchetypeID;
        let archetype = Archetype::new(archetype_id, key, self.config.initial_heap_capacity)?;
        debug!(
            archetype = archetype_id,
            components = ?key.components,
            tags = ?key.tags,
            "created archetype"
        );
        self.archetypes.push(archetype);
        self.archetype_map.insert(key, archetype_id);
        Ok(archetype_id)
    }

    /// Moves record `id` from `location` to the archetype of `key` and fixes
    /// the location of the record swapped into the vacated slot.
    fn move_entity(
        &mut self,
        id: EntityID,
        location: EntityLocation,
        key: ArchetypeKey,
        added: Option<(ComponentID, Box<dyn Any + Send>)>,
    ) -> StoreResult<EntityLocation> {
        let destination = self.get_or_create_archetype(key)?;
        let (source, target) = archetype_pair_mut(&mut self.archetypes, location.archetype, destination)?;
        let moved = source.move_row_to(target, location.row, added)?;
        let new_location = EntityLocation::new(destination, moved.destination_row);
        self.entities.set_location(id, new_location);
        if let Some(displaced) = moved.displaced {
            self.entities.set_location(displaced, location);
        }
        Ok(new_location)
    }
}
