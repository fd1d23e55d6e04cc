//! # Value Indices
//!
//! Secondary structures mapping a field's *value* back to the records holding
//! it, for one field type each.
//!
//! ## Index kinds
//! - [`OrderedIndex`]: values with a total order, kept in a `BTreeMap`.
//!   Supports ordered enumeration and inclusive range scans.
//! - [`HashedIndex`]: values that are only hashable. Enumeration follows the
//!   order in which each distinct value first entered the index; range scans
//!   are not available.
//! - [`EntityIndex`]: values are record references. Buckets are keyed by the
//!   target id, so the bucket of a target is exactly its set of incoming links.
//!
//! ## Design
//! Buckets are flat: `value -> IdSet` owned by the index, records referenced by
//! id only. Reference cycles (A links B links A) therefore need no special
//! handling.
//!
//! ## Invariants
//! - A bucket is never empty; the last id leaving a bucket drops it.
//! - For every record holding an indexed field, its id is in exactly the
//!   bucket of its current value.
//!
//! The store drives maintenance through [`ErasedIndex`], which reads values
//! straight out of archetype columns so that add, update, verify and remove all
//! see the value actually stored in the record.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::ops::Bound;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::engine::component::{short_type_name, Component};
use crate::engine::entity::Entity;
use crate::engine::error::{HeapError, IndexError, StoreResult};
use crate::engine::storage::{downcast_heap, ErasedHeap};
use crate::engine::types::EntityID;

/// Ascending set of record ids sharing one indexed value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdSet {
    ids: SmallVec<[EntityID; 4]>,
}

impl IdSet {
    /// Inserts `id`; returns `false` if it was already present.
    pub fn insert(&mut self, id: EntityID) -> bool {
        match self.ids.binary_search(&id) {
            Ok(_) => false,
            Err(position) => {
                self.ids.insert(position, id);
                true
            }
        }
    }

    /// Removes `id`; returns `false` if it was absent.
    pub fn remove(&mut self, id: EntityID) -> bool {
        match self.ids.binary_search(&id) {
            Ok(position) => {
                self.ids.remove(position);
                true
            }
            Err(_) => false,
        }
    }

    /// Returns `true` if `id` is in the set.
    #[inline]
    pub fn contains(&self, id: EntityID) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    /// Number of ids.
    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns `true` when the set holds no id.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids in ascending order.
    #[inline]
    pub fn as_slice(&self) -> &[EntityID] {
        &self.ids
    }
}

/// Maintenance and lookup operations of one value index.
///
/// `V` is the value type the field exposes through
/// [`IndexedComponent::indexed_value`].

pub trait ComponentIndex<V>: Default + Send + Sync + 'static {
    /// Values have a total order; range scans are supported.
    const ORDERED: bool;

    /// Values are record references; incoming links are tracked.
    const LINKS: bool = false;

    /// Inserts `id` into the bucket of `value`, creating the bucket if needed.
    fn add(&mut self, value: &V, id: EntityID);

    /// Removes `id` from the bucket of `value`; returns `false` if absent.
    fn remove(&mut self, value: &V, id: EntityID) -> bool;

    /// Returns `true` if `id` is in the bucket of `value`.
    fn contains(&self, value: &V, id: EntityID) -> bool;

    /// Ids in the bucket of `value`, ascending.
    fn ids_of(&self, value: &V) -> &[EntityID];

    /// Ids whose value lies in `[min, max]`, ordered by value then id.
    /// `None` when the index has no value ordering.
    fn ids_in_range(&self, min: &V, max: &V) -> Option<Vec<EntityID>>;

    /// Number of distinct values.
    fn value_count(&self) -> usize;

    /// Ids referencing `target`. Empty for non-reference indices.
    fn incoming_links(&self, _target: EntityID) -> &[EntityID] {
        &[]
    }

    /// Record referenced by `value`, for reference indices.
    fn link_target(_value: &V) -> Option<Entity> {
        None
    }
}

/// A field type whose values are indexed.
///
/// ```ignore
/// struct Score { value: i32 }
///
/// impl IndexedComponent for Score {
///     type Value = i32;
///     type Index = OrderedIndex<i32>;
///     fn indexed_value(&self) -> i32 { self.value }
/// }
/// ```

pub trait IndexedComponent: Component {
    /// Value the index is keyed by.
    type Value: Clone + Send + Sync + 'static;
    /// Index strategy maintained for this field type.
    type Index: ComponentIndex<Self::Value>;
    /// Extracts the indexed value from a field instance.
    fn indexed_value(&self) -> Self::Value;
}

/// Index over totally ordered values.
#[derive(Debug)]
pub struct OrderedIndex<V> {
    map: BTreeMap<V, IdSet>,
}

impl<V> Default for OrderedIndex<V> {
    fn default() -> Self {
        Self { map: BTreeMap::new() }
    }
}

impl<V: Ord> OrderedIndex<V> {
    /// Distinct values in ascending order.
    pub fn values(&self) -> Values<'_, V> {
        Values { keys: self.map.keys().collect() }
    }

    /// Returns `true` if some record currently holds `value`.
    pub fn has_value(&self, value: &V) -> bool {
        self.map.contains_key(value)
    }

    /// Ids holding `value`.
    pub fn entities(&self, value: &V) -> EntityIds<'_> {
        EntityIds { ids: self.map.get(value).map(IdSet::as_slice).unwrap_or(&[]) }
    }

    /// Distinct values in `[min, max]`, ascending. Empty when `min > max`.
    pub fn values_in_range(&self, min: &V, max: &V) -> Values<'_, V> {
        if min > max {
            return Values { keys: Vec::new() };
        }
        Values {
            keys: self.map.range((Bound::Included(min), Bound::Included(max))).map(|(value, _)| value).collect(),
        }
    }
}

impl<V> ComponentIndex<V> for OrderedIndex<V>
where
    V: Ord + Clone + Send + Sync + 'static,
{
    const ORDERED: bool = true;

    fn add(&mut self, value: &V, id: EntityID) {
        self.map.entry(value.clone()).or_default().insert(id);
    }

    fn remove(&mut self, value: &V, id: EntityID) -> bool {
        let Some(bucket) = self.map.get_mut(value) else {
            return false;
        };
        let removed = bucket.remove(id);
        if bucket.is_empty() {
            self.map.remove(value);
        }
        removed
    }

    fn contains(&self, value: &V, id: EntityID) -> bool {
        self.map.get(value).is_some_and(|bucket| bucket.contains(id))
    }

    fn ids_of(&self, value: &V) -> &[EntityID] {
        self.map.get(value).map(IdSet::as_slice).unwrap_or(&[])
    }

    fn ids_in_range(&self, min: &V, max: &V) -> Option<Vec<EntityID>> {
        if min > max {
            return Some(Vec::new());
        }
        let ids = self
            .map
            .range((Bound::Included(min), Bound::Included(max)))
            .flat_map(|(_, bucket)| bucket.as_slice().iter().copied())
            .collect();
        Some(ids)
    }

    fn value_count(&self) -> usize {
        self.map.len()
    }
}

#[derive(Debug)]
struct HashedBucket {
    sequence: u64,
    ids: IdSet,
}

/// Index over hashable values without an order.
///
/// [`values`](Self::values) lists distinct values in the order they first
/// entered the index; a value that leaves and re-enters moves to the end.

#[derive(Debug)]
pub struct HashedIndex<V> {
    map: FxHashMap<V, HashedBucket>,
    next_sequence: u64,
}

impl<V> Default for HashedIndex<V> {
    fn default() -> Self {
        Self { map: FxHashMap::default(), next_sequence: 0 }
    }
}

impl<V: Hash + Eq> HashedIndex<V> {
    /// Distinct values in insertion order.
    pub fn values(&self) -> Values<'_, V> {
        let mut entries: Vec<(&V, u64)> = self
            .map
            .iter()
            .map(|(value, bucket)| (value, bucket.sequence))
            .collect();
        entries.sort_unstable_by_key(|(_, sequence)| *sequence);
        Values { keys: entries.into_iter().map(|(value, _)| value).collect() }
    }

    /// Returns `true` if some record currently holds `value`.
    pub fn has_value(&self, value: &V) -> bool {
        self.map.contains_key(value)
    }

    /// Ids holding `value`, ascending.
    pub fn entities(&self, value: &V) -> EntityIds<'_> {
        EntityIds { ids: self.map.get(value).map(|b| b.ids.as_slice()).unwrap_or(&[]) }
    }
}

impl<V> ComponentIndex<V> for HashedIndex<V>
where
    V: Hash + Eq + Clone + Send + Sync + 'static,
{
    const ORDERED: bool = false;

    fn add(&mut self, value: &V, id: EntityID) {
        let next_sequence = &mut self.next_sequence;
        self.map
            .entry(value.clone())
            .or_insert_with(|| {
                let sequence = *next_sequence;
                *next_sequence += 1;
                HashedBucket { sequence, ids: IdSet::default() }
            })
            .ids
            .insert(id);
    }

    fn remove(&mut self, value: &V, id: EntityID) -> bool {
        let Some(bucket) = self.map.get_mut(value) else {
            return false;
        };
        let removed = bucket.ids.remove(id);
        if bucket.ids.is_empty() {
            self.map.remove(value);
        }
        removed
    }

    fn contains(&self, value: &V, id: EntityID) -> bool {
        self.map.get(value).is_some_and(|bucket| bucket.ids.contains(id))
    }

    fn ids_of(&self, value: &V) -> &[EntityID] {
        self.map.get(value).map(|bucket| bucket.ids.as_slice()).unwrap_or(&[])
    }

    fn ids_in_range(&self, _min: &V, _max: &V) -> Option<Vec<EntityID>> {
        None
    }

    fn value_count(&self) -> usize {
        self.map.len()
    }
}

/// Index over record references with incoming-link lookup.
///
/// The bucket of target `t` holds every record whose field currently points
/// at `t`; values enumerate target ids in ascending order.

#[derive(Debug, Default)]
pub struct EntityIndex {
    targets: OrderedIndex<EntityID>,
}

impl EntityIndex {
    /// Distinct target ids in ascending order.
    pub fn values(&self) -> Values<'_, EntityID> {
        self.targets.values()
    }

    /// Returns `true` if some record references `target`.
    pub fn has_value(&self, target: &Entity) -> bool {
        self.targets.has_value(&target.id)
    }

    /// Records whose field references `target`.
    pub fn links_to(&self, target: EntityID) -> EntityIds<'_> {
        self.targets.entities(&target)
    }
}

impl ComponentIndex<Entity> for EntityIndex {
    const ORDERED: bool = true;
    const LINKS: bool = true;

    fn add(&mut self, value: &Entity, id: EntityID) {
        self.targets.add(&value.id, id);
    }

    fn remove(&mut self, value: &Entity, id: EntityID) -> bool {
        self.targets.remove(&value.id, id)
    }

    fn contains(&self, value: &Entity, id: EntityID) -> bool {
        self.targets.contains(&value.id, id)
    }

    fn ids_of(&self, value: &Entity) -> &[EntityID] {
        self.targets.ids_of(&value.id)
    }

    fn ids_in_range(&self, min: &Entity, max: &Entity) -> Option<Vec<EntityID>> {
        self.targets.ids_in_range(&min.id, &max.id)
    }

    fn value_count(&self) -> usize {
        self.targets.value_count()
    }

    fn incoming_links(&self, target: EntityID) -> &[EntityID] {
        self.targets.ids_of(&target)
    }

    fn link_target(value: &Entity) -> Option<Entity> {
        Some(*value)
    }
}

/// View of the distinct values of an index.
///
/// Borrowed from the index, so it always reflects the index state at the
/// time of the borrow. Displays as `{ 10, 20 }`, or `{ }` when empty.

#[derive(Clone, Debug)]
pub struct Values<'a, K> {
    keys: Vec<&'a K>,
}

impl<'a, K> Values<'a, K> {
    /// Number of distinct values.
    #[inline]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` when the index holds no value.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Values in view order.
    pub fn iter(&self) -> impl Iterator<Item = &'a K> + '_ {
        self.keys.iter().copied()
    }

    /// Returns `true` if `key` is one of the values.
    pub fn contains(&self, key: &K) -> bool
    where
        K: PartialEq,
    {
        self.keys.iter().any(|k| *k == key)
    }

    /// Owned copy of the values in view order.
    pub fn to_vec(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.keys.iter().map(|k| (*k).clone()).collect()
    }
}

impl<K: fmt::Display> fmt::Display for Values<'_, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_braced(f, self.keys.iter())
    }
}

/// Ascending id list borrowed from an index bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityIds<'a> {
    ids: &'a [EntityID],
}

impl<'a> EntityIds<'a> {
    /// Number of ids.
    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns `true` when no id is listed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns `true` if `id` is listed.
    #[inline]
    pub fn contains(&self, id: EntityID) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    /// Ids in ascending order.
    #[inline]
    pub fn as_slice(&self) -> &'a [EntityID] {
        self.ids
    }

    /// Iterator over the ids, ascending.
    pub fn iter(&self) -> impl Iterator<Item = EntityID> + 'a {
        self.ids.iter().copied()
    }
}

impl fmt::Display for EntityIds<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_braced(f, self.ids.iter())
    }
}

fn write_braced<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    items: impl Iterator<Item = T>,
) -> fmt::Result {
    f.write_str("{")?;
    let mut first = true;
    for item in items {
        f.write_str(if first { " " } else { ", " })?;
        write!(f, "{item}")?;
        first = false;
    }
    f.write_str(" }")
}

// ─────────────────────────────────────────────────────────────────────────────
// Type-erased maintenance
// ─────────────────────────────────────────────────────────────────────────────

/// Object-safe view of an index, driven by the store with column access.
///
/// ## Invariants
/// `heap` arguments are always the column of the index's own field type in
/// the archetype currently holding record `id`, and `row` is that record's
/// slot.

pub trait ErasedIndex: Any + Send + Sync {
    /// Short name of the indexed field type.
    fn component_name(&self) -> &'static str;

    /// Erased reference for downcasting to the typed index.
    fn as_any(&self) -> &dyn Any;

    /// Mutable form of [`as_any`](Self::as_any).
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Index tracks record references.
    fn is_link_index(&self) -> bool;

    /// Number of distinct values.
    fn value_count(&self) -> usize;

    /// Indexes the value stored at `row` for record `id`.
    fn add_from_heap(&mut self, id: EntityID, heap: &dyn ErasedHeap, row: usize) -> StoreResult<()>;

    /// Checks that the value stored at `row` is indexed for `id`.
    fn verify_from_heap(&self, id: EntityID, heap: &dyn ErasedHeap, row: usize) -> StoreResult<()>;

    /// Removes `id` from the bucket of the value stored at `row`.
    fn remove_from_heap(&mut self, id: EntityID, heap: &dyn ErasedHeap, row: usize) -> StoreResult<()>;

    /// Ids referencing `target`.
    fn incoming_links(&self, target: EntityID) -> &[EntityID];

    /// Record referenced by a field value of this index's type. `None` for
    /// non-reference indices or a value of another type.
    fn link_target_of(&self, value: &dyn Any) -> Option<Entity>;
}

/// Index of field type `C`, erased behind [`ErasedIndex`].
pub(crate) struct TypedIndex<C: IndexedComponent> {
    index: C::Index,
    _marker: PhantomData<fn() -> C>,
}

impl<C: IndexedComponent> TypedIndex<C> {
    #[inline]
    pub(crate) fn index(&self) -> &C::Index {
        &self.index
    }

    fn value_at(heap: &dyn ErasedHeap, row: usize) -> StoreResult<C::Value> {
        let heap = downcast_heap::<C>(heap)?;
        let length = heap.len();
        heap.get(row)
            .map(C::indexed_value)
            .ok_or_else(|| HeapError::OutOfBounds { row, length }.into())
    }

    fn not_found(id: EntityID) -> IndexError {
        IndexError::ValueNotFound {
            component: short_type_name(std::any::type_name::<C>()),
            entity: id,
        }
    }
}

/// Index factory installed by `register_indexed_component`.
pub(crate) fn new_index_storage<C: IndexedComponent>() -> Box<dyn ErasedIndex> {
    Box::new(TypedIndex::<C> { index: C::Index::default(), _marker: PhantomData })
}

impl<C: IndexedComponent> ErasedIndex for TypedIndex<C> {
    fn component_name(&self) -> &'static str {
        short_type_name(std::any::type_name::<C>())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn is_link_index(&self) -> bool {
        <C::Index as ComponentIndex<C::Value>>::LINKS
    }

    fn value_count(&self) -> usize {
        self.index.value_count()
    }

    fn add_from_heap(&mut self, id: EntityID, heap: &dyn ErasedHeap, row: usize) -> StoreResult<()> {
        let value = Self::value_at(heap, row)?;
        self.index.add(&value, id);
        Ok(())
    }

    fn verify_from_heap(&self, id: EntityID, heap: &dyn ErasedHeap, row: usize) -> StoreResult<()> {
        let value = Self::value_at(heap, row)?;
        if self.index.contains(&value, id) {
            Ok(())
        } else {
            Err(Self::not_found(id).into())
        }
    }

    fn remove_from_heap(&mut self, id: EntityID, heap: &dyn ErasedHeap, row: usize) -> StoreResult<()> {
        let value = Self::value_at(heap, row)?;
        if self.index.remove(&value, id) {
            Ok(())
        } else {
            Err(Self::not_found(id).into())
        }
    }

    fn incoming_links(&self, target: EntityID) -> &[EntityID] {
        self.index.incoming_links(target)
    }

    fn link_target_of(&self, value: &dyn Any) -> Option<Entity> {
        let field = value.downcast_ref::<C>()?;
        <C::Index as ComponentIndex<C::Value>>::link_target(&field.indexed_value())
    }
}
