//! Typed query construction and execution.
//!
//! This module provides a *builder-style* API for selecting archetypes by
//! field-type and tag predicates, optionally narrowed by a value filter on an
//! indexed field, and for executing the selection as a chunk enumeration, a
//! per-record callback or a parallel job.
//!
//! ## Design goals
//! * **One query type for every arity:** [`QueryData`] is implemented for
//!   tuples of 1 to [`QUERY_ARITY_MAX`] field types.
//! * **Ordered matching:** matched archetypes are listed in creation order.
//! * **Cheap re-execution:** a frozen query keeps its matched list and only
//!   examines archetypes created since the last execution.
//!
//! ## Matching rule
//! An archetype matches iff it has *all* required field types and tags, at
//! least one of each non-empty "any" set, does not have every member of a
//! non-empty "without all" set, and has none of the "without any" set.
//! Records tagged [`Disabled`](crate::engine::component::Disabled) are
//! excluded unless `with_disabled` was requested.
//!
//! ## Example
//! ```ignore
//! let mut query = store
//!     .query::<(Position, Velocity)>()?
//!     .without_any_tags(tag_set::<(Frozen,)>()?)?
//!     .freeze_filter();
//!
//! query.for_each_entity(&mut store, |(position, velocity), _entity| {
//!     position.x += velocity.dx;
//! })?;
//! ```

use std::marker::PhantomData;

use smallvec::SmallVec;

use crate::engine::archetype::Archetype;
use crate::engine::chunks::{carve_segments, ChunkEnumerator};
use crate::engine::component::{component_desc, component_id_of, component_name, Component, DISABLED_TAG};
use crate::engine::entity::Entity;
use crate::engine::error::{QueryError, RegistryError, StoreError, StoreResult};
use crate::engine::index::{ComponentIndex, IndexedComponent};
use crate::engine::parallel::QueryJob;
use crate::engine::storage::{downcast_heap_mut, HeapMut};
use crate::engine::store::EntityStore;
use crate::engine::types::{
    ArchetypeID, ArchetypeKey, ChunkRange, ComponentID, EntityID, Signature, Tags, QUERY_ARITY_MAX,
};

/// Field type ids requested by a query, in tuple order.
pub type ComponentList = SmallVec<[ComponentID; QUERY_ARITY_MAX]>;

/// Tuple of field types a query reads or writes.
///
/// Implemented for `(A,)` through `(A, B, C, D, E)`. All associated types are
/// aligned tuples: element `k` belongs to the `k`-th field type.

pub trait QueryData: 'static {
    /// Shared slices, one per field type.
    type Slices<'a>: Copy
    where
        Self: 'a;

    /// Mutable slices, one per field type.
    type SlicesMut<'a>: Send
    where
        Self: 'a;

    /// Mutable references to one record's fields.
    type ItemMut<'a>
    where
        Self: 'a;

    /// Registered ids of the field types.
    fn component_ids() -> StoreResult<ComponentList>;

    /// Shared slices over `[start, start + len)` of `archetype`.
    fn slices<'a>(
        archetype: &'a Archetype,
        ids: &[ComponentID],
        start: usize,
        len: usize,
    ) -> StoreResult<Self::Slices<'a>>;

    /// Mutable slices over `[start, start + len)` of the given columns.
    fn slices_mut<'a>(heaps: Vec<HeapMut<'a>>, start: usize, len: usize) -> StoreResult<Self::SlicesMut<'a>>;

    /// Splits every slice at `mid`.
    fn split_at_mut<'a>(slices: Self::SlicesMut<'a>, mid: usize) -> (Self::SlicesMut<'a>, Self::SlicesMut<'a>);

    /// Calls `f` once per slot with that slot's field references and id.
    fn for_each_row<'a, F>(slices: Self::SlicesMut<'a>, ids: &[EntityID], f: F)
    where
        F: FnMut(Self::ItemMut<'a>, EntityID);
}

fn next_component(ids: &mut impl Iterator<Item = ComponentID>) -> StoreResult<ComponentID> {
    ids.next()
        .ok_or_else(|| StoreError::Internal("query arity does not match its column list".into()))
}

macro_rules! impl_query_data {
    ($($name:ident $var:ident),+) => {
        impl<$($name: Component),+> QueryData for ($($name,)+) {
            type Slices<'a> = ($(&'a [$name],)+) where Self: 'a;
            type SlicesMut<'a> = ($(&'a mut [$name],)+) where Self: 'a;
            type ItemMut<'a> = ($(&'a mut $name,)+) where Self: 'a;

            fn component_ids() -> StoreResult<ComponentList> {
                Ok(smallvec::smallvec![$(component_id_of::<$name>()?),+])
            }

            fn slices<'a>(
                archetype: &'a Archetype,
                ids: &[ComponentID],
                start: usize,
                len: usize,
            ) -> StoreResult<Self::Slices<'a>> {
                let mut ids = ids.iter().copied();
                $(let $var = archetype.heap::<$name>(next_component(&mut ids)?)?.slice(start, len)?;)+
                Ok(($($var,)+))
            }

            fn slices_mut<'a>(
                heaps: Vec<HeapMut<'a>>,
                start: usize,
                len: usize,
            ) -> StoreResult<Self::SlicesMut<'a>> {
                let mut heaps = heaps.into_iter();
                $(let $var = downcast_heap_mut::<$name>(heaps.next())?.slice_mut(start, len)?;)+
                Ok(($($var,)+))
            }

            fn split_at_mut<'a>(
                slices: Self::SlicesMut<'a>,
                mid: usize,
            ) -> (Self::SlicesMut<'a>, Self::SlicesMut<'a>) {
                let ($($var,)+) = slices;
                $(let $var = $var.split_at_mut(mid);)+
                (($($var.0,)+), ($($var.1,)+))
            }

            fn for_each_row<'a, F>(slices: Self::SlicesMut<'a>, ids: &[EntityID], mut f: F)
            where
                F: FnMut(Self::ItemMut<'a>, EntityID),
            {
                let ($($var,)+) = slices;
                $(let mut $var = $var.into_iter();)+
                for &id in ids {
                    $(let Some($var) = $var.next() else { return; };)+
                    f(($($var,)+), id);
                }
            }
        }
    };
}

impl_query_data!(A a);
impl_query_data!(A a, B b);
impl_query_data!(A a, B b, C c);
impl_query_data!(A a, B b, C c, D d);
impl_query_data!(A a, B b, C c, D d, E e);

/// Field-type and tag predicates of a query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueryFilter {
    /// Field types every matched archetype must have.
    pub all_components: Signature,
    /// Field types of which at least one must be present.
    pub any_components: Signature,
    /// Archetypes having all of these are excluded.
    pub without_all_components: Signature,
    /// Archetypes having any of these are excluded.
    pub without_any_components: Signature,
    /// Tags every matched archetype must have.
    pub all_tags: Tags,
    /// Tags of which at least one must be present.
    pub any_tags: Tags,
    /// Archetypes having all of these tags are excluded.
    pub without_all_tags: Tags,
    /// Archetypes having any of these tags are excluded.
    pub without_any_tags: Tags,
    /// Include archetypes tagged `Disabled`.
    pub with_disabled: bool,
}

impl QueryFilter {
    /// Applies the matching rule to an archetype key.
    pub fn matches(&self, key: &ArchetypeKey) -> bool {
        let components = &key.components;
        let tags = &key.tags;

        let disabled_ok = self.with_disabled
            || !tags.has(DISABLED_TAG)
            || self.all_tags.has(DISABLED_TAG)
            || self.any_tags.has(DISABLED_TAG);

        components.contains_all(&self.all_components)
            && (self.any_components.is_empty() || components.intersects(&self.any_components))
            && (self.without_all_components.is_empty()
                || !components.contains_all(&self.without_all_components))
            && !components.intersects(&self.without_any_components)
            && tags.contains_all(&self.all_tags)
            && (self.any_tags.is_empty() || tags.intersects(&self.any_tags))
            && (self.without_all_tags.is_empty() || !tags.contains_all(&self.without_all_tags))
            && !tags.intersects(&self.without_any_tags)
            && disabled_ok
    }
}

/// Candidate ids supplied by a field index.
struct ValueFilter {
    component_id: ComponentID,
    lookup: Box<dyn Fn(&EntityStore) -> Vec<EntityID> + Send + Sync>,
}

/// A reusable, store-bound selection of records with fields `D`.
///
/// ## Invariants
/// - `filter.all_components` always contains every field type of `D`.
/// - Once frozen, `filter` and `value_filter` never change, so the matched
///   archetype list only ever grows.

pub struct Query<D: QueryData> {
    store_id: u64,
    component_ids: ComponentList,
    filter: QueryFilter,
    value_filter: Option<ValueFilter>,
    frozen: bool,
    detect_structural_changes: bool,
    matched: Vec<ArchetypeID>,
    seen: usize,
    _marker: PhantomData<fn() -> D>,
}

impl<D: QueryData> std::fmt::Debug for Query<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("store_id", &self.store_id)
            .field("components", &self.component_ids)
            .field("filter", &self.filter)
            .field("value_filter", &self.value_filter.as_ref().map(|v| component_name(v.component_id)))
            .field("frozen", &self.frozen)
            .finish()
    }
}

impl<D: QueryData> Query<D> {
    /// Creates a query over `D` for store `store_id`.
    ///
    /// ## Errors
    /// - A field type of `D` is not registered.
    /// - [`QueryError::DuplicateComponent`] if `D` names a field type twice.

    pub(crate) fn new(store_id: u64) -> StoreResult<Self> {
        let component_ids = D::component_ids()?;
        let mut filter = QueryFilter::default();
        for &component_id in &component_ids {
            if filter.all_components.has(component_id) {
                return Err(QueryError::DuplicateComponent { component: component_name(component_id) }.into());
            }
            filter.all_components.set(component_id);
        }
        Ok(Self {
            store_id,
            component_ids,
            filter,
            value_filter: None,
            frozen: false,
            detect_structural_changes: false,
            matched: Vec::new(),
            seen: 0,
            _marker: PhantomData,
        })
    }

    fn update_filter(mut self, update: impl FnOnce(&mut QueryFilter)) -> StoreResult<Self> {
        if self.frozen {
            return Err(QueryError::Frozen.into());
        }
        update(&mut self.filter);
        self.matched.clear();
        self.seen = 0;
        Ok(self)
    }

    /// Requires every field type in `types`.
    pub fn all_components(self, types: Signature) -> StoreResult<Self> {
        self.update_filter(|f| f.all_components = f.all_components.union(&types))
    }

    /// Requires at least one field type in `types`.
    pub fn any_components(self, types: Signature) -> StoreResult<Self> {
        self.update_filter(|f| f.any_components = f.any_components.union(&types))
    }

    /// Excludes archetypes having every field type in `types`.
    pub fn without_all_components(self, types: Signature) -> StoreResult<Self> {
        self.update_filter(|f| f.without_all_components = f.without_all_components.union(&types))
    }

    /// Excludes archetypes having any field type in `types`.
    pub fn without_any_components(self, types: Signature) -> StoreResult<Self> {
        self.update_filter(|f| f.without_any_components = f.without_any_components.union(&types))
    }

    /// Requires every tag in `tags`.
    pub fn all_tags(self, tags: Tags) -> StoreResult<Self> {
        self.update_filter(|f| f.all_tags = f.all_tags.union(&tags))
    }

    /// Requires at least one tag in `tags`.
    pub fn any_tags(self, tags: Tags) -> StoreResult<Self> {
        self.update_filter(|f| f.any_tags = f.any_tags.union(&tags))
    }

    /// Excludes archetypes having every tag in `tags`.
    pub fn without_all_tags(self, tags: Tags) -> StoreResult<Self> {
        self.update_filter(|f| f.without_all_tags = f.without_all_tags.union(&tags))
    }

    /// Excludes archetypes having any tag in `tags`.
    pub fn without_any_tags(self, tags: Tags) -> StoreResult<Self> {
        self.update_filter(|f| f.without_any_tags = f.without_any_tags.union(&tags))
    }

    /// Includes records tagged `Disabled`.
    pub fn with_disabled(self) -> StoreResult<Self> {
        self.update_filter(|f| f.with_disabled = true)
    }

    /// Restricts the query to records whose `C` field currently equals `value`.
    ///
    /// ## Errors
    /// [`QueryError::NotIndexed`] if `C` was registered without an index.

    pub fn has_value<C: IndexedComponent>(self, value: C::Value) -> StoreResult<Self> {
        let component_id = indexed_component_id::<C>()?;
        let lookup = move |store: &EntityStore| {
            store
                .try_index::<C>()
                .map(|index| index.ids_of(&value).to_vec())
                .unwrap_or_default()
        };
        self.with_value_filter(component_id, Box::new(lookup))
    }

    /// Restricts the query to records whose `C` field lies in `[min, max]`.
    ///
    /// ## Errors
    /// - [`QueryError::NotIndexed`] if `C` was registered without an index.
    /// - [`QueryError::NotComparable`] if the index of `C` has no value order.

    pub fn value_in_range<C: IndexedComponent>(self, min: C::Value, max: C::Value) -> StoreResult<Self> {
        let component_id = indexed_component_id::<C>()?;
        if !<C::Index as ComponentIndex<C::Value>>::ORDERED {
            return Err(QueryError::NotComparable { component: component_name(component_id) }.into());
        }
        let lookup = move |store: &EntityStore| {
            store
                .try_index::<C>()
                .and_then(|index| index.ids_in_range(&min, &max))
                .unwrap_or_default()
        };
        self.with_value_filter(component_id, Box::new(lookup))
    }

    fn with_value_filter(
        self,
        component_id: ComponentID,
        lookup: Box<dyn Fn(&EntityStore) -> Vec<EntityID> + Send + Sync>,
    ) -> StoreResult<Self> {
        let mut query = self.update_filter(|f| f.all_components.set(component_id))?;
        query.value_filter = Some(ValueFilter { component_id, lookup });
        Ok(query)
    }

    /// Forbids further predicate changes and enables incremental matching.
    pub fn freeze_filter(mut self) -> Self {
        self.frozen = true;
        self
    }

    /// Enumerators created from this query hold a loop guard on the store,
    /// rejecting structural changes until they are dropped.
    pub fn detect_structural_changes(mut self) -> Self {
        self.detect_structural_changes = true;
        self
    }

    /// Returns `true` once `freeze_filter` was called.
    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Current field-type and tag predicates.
    #[inline]
    pub fn filter(&self) -> &QueryFilter {
        &self.filter
    }

    /// Field type ids of `D`, in tuple order.
    #[inline]
    pub fn component_ids(&self) -> &[ComponentID] {
        &self.component_ids
    }

    /// Returns `true` if a value filter narrows this query to single records.
    #[inline]
    pub fn is_value_filtered(&self) -> bool {
        self.value_filter.is_some()
    }

    fn check_store(&self, store: &EntityStore) -> StoreResult<()> {
        if store.store_id() != self.store_id {
            return Err(QueryError::ForeignStore { expected: self.store_id, actual: store.store_id() }.into());
        }
        Ok(())
    }

    fn refresh(&mut self, store: &EntityStore) -> StoreResult<()> {
        self.check_store(store)?;
        if !self.frozen {
            self.matched.clear();
            self.seen = 0;
        }
        let archetypes = store.archetypes();
        for archetype in &archetypes[self.seen.min(archetypes.len())..] {
            if self.filter.matches(archetype.key()) {
                self.matched.push(archetype.archetype_id());
            }
        }
        self.seen = archetypes.len();
        Ok(())
    }

    /// Matched archetypes in creation order, including empty ones.
    pub fn archetypes(&mut self, store: &EntityStore) -> StoreResult<&[ArchetypeID]> {
        self.refresh(store)?;
        Ok(&self.matched)
    }

    /// Windows to visit: one per non-empty matched archetype, or one per
    /// matching record when a value filter is set.
    pub fn chunk_ranges(&mut self, store: &EntityStore) -> StoreResult<Vec<ChunkRange>> {
        self.refresh(store)?;
        let archetypes = store.archetypes();
        let Some(value_filter) = &self.value_filter else {
            return Ok(self
                .matched
                .iter()
                .filter_map(|&id| {
                    let len = archetypes[id as usize].len();
                    (len > 0).then(|| ChunkRange::new(id, 0, len))
                })
                .collect());
        };

        let mut eligible = vec![false; archetypes.len()];
        for &id in &self.matched {
            eligible[id as usize] = true;
        }
        let nodes = store.entity_nodes();
        Ok((value_filter.lookup)(store)
            .into_iter()
            .filter_map(|id| nodes.location_of_id(id))
            .filter(|location| eligible[location.archetype as usize])
            .map(|location| ChunkRange::new(location.archetype, location.row, 1))
            .collect())
    }

    /// Number of records the query currently yields.
    pub fn count(&mut self, store: &EntityStore) -> StoreResult<usize> {
        Ok(self.chunk_ranges(store)?.iter().map(|range| range.len).sum())
    }

    /// Pull-based chunk enumeration over `store`.
    ///
    /// ## Errors
    /// A matched window that no longer resolves to archetype columns.
    pub fn chunks<'a>(&mut self, store: &'a EntityStore) -> StoreResult<ChunkEnumerator<'a, D>> {
        let ranges = self.chunk_ranges(store)?;
        let guard = self.detect_structural_changes.then(|| store.begin_loop());
        ChunkEnumerator::new(store, &self.component_ids, ranges, self.value_filter.is_some(), guard)
    }

    /// Calls `f` once per matched record with mutable references to its
    /// fields and its current handle. Records are visited in archetype order,
    /// then slot order.
    pub fn for_each_entity<'s, F>(&mut self, store: &'s mut EntityStore, mut f: F) -> StoreResult<()>
    where
        F: FnMut(D::ItemMut<'s>, Entity),
    {
        let ranges = self.chunk_ranges(store)?;
        let (archetypes, nodes) = store.split_for_iteration();
        let segments = carve_segments::<D>(archetypes, &self.component_ids, &[ranges])?;
        for segment in segments.into_iter().flatten() {
            D::for_each_row(segment.slices, segment.ids, |fields, id| f(fields, nodes.resolve(id)));
        }
        Ok(())
    }

    /// Creates a job running `action` on every matched chunk.
    ///
    /// The job uses the store's [`JobConfig`](crate::engine::config::JobConfig)
    /// unless overridden on the job.
    pub fn for_each<F, E>(&mut self, action: F) -> QueryJob<'_, D, F, E>
    where
        F: for<'c> Fn(crate::engine::chunks::ChunksMut<'c, D>) -> Result<(), E> + Send + Sync,
        E: std::fmt::Display,
    {
        QueryJob::new(self, action)
    }
}

fn indexed_component_id<C: IndexedComponent>() -> StoreResult<ComponentID> {
    let component_id = component_id_of::<C>()?;
    let desc = component_desc(component_id).ok_or(RegistryError::UnregisteredComponent {
        name: std::any::type_name::<C>(),
    })?;
    if !desc.indexed {
        return Err(QueryError::NotIndexed { component: desc.name }.into());
    }
    Ok(component_id)
}
