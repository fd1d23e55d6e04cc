//! Chunk views, the chunk enumerator and the store loop guard.
//!
//! ## Chunks
//! A chunk is a window `[start, start + len)` over one archetype. It exposes
//! one slice per requested field type plus the matching slice of the id
//! column; index `n` in every slice refers to the same record.
//!
//! ## Enumeration modes
//! - **Archetype mode**: one chunk per non-empty matched archetype.
//! - **Single-entity mode**: used when a value filter is present; one chunk of
//!   length 1 per matching record, from a precomputed position list.
//!
//! ## Loop guard
//! A [`LoopGuard`] marks a loop as active on one store. While any guard of a
//! store is alive, every structural operation on that store fails with
//! [`StoreError::StructuralChangeDuringIteration`](crate::engine::error::StoreError::StructuralChangeDuringIteration).
//! Guards are counted per store instance.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::engine::archetype::Archetype;
use crate::engine::entity::{Entity, EntityNodes};
use crate::engine::error::{StoreError, StoreResult};
use crate::engine::query::QueryData;
use crate::engine::store::EntityStore;
use crate::engine::types::{ArchetypeID, ChunkRange, ComponentID, EntityID};

/// Per-store count of active loops.
#[derive(Clone, Debug, Default)]
pub(crate) struct LoopCounter(Arc<AtomicUsize>);

impl LoopCounter {
    #[inline]
    pub(crate) fn active(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn acquire(&self) -> LoopGuard {
        self.0.fetch_add(1, Ordering::AcqRel);
        LoopGuard { counter: Arc::clone(&self.0) }
    }
}

/// Keeps structural changes on a store rejected until dropped.
#[derive(Debug)]
pub struct LoopGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Record ids of a chunk, with revision lookup.
#[derive(Clone, Copy)]
pub struct ChunkEntities<'a> {
    archetype: ArchetypeID,
    start: usize,
    task_index: usize,
    ids: &'a [EntityID],
    nodes: &'a EntityNodes,
}

impl<'a> ChunkEntities<'a> {
    pub(crate) fn new(
        archetype: ArchetypeID,
        start: usize,
        task_index: usize,
        ids: &'a [EntityID],
        nodes: &'a EntityNodes,
    ) -> Self {
        Self { archetype, start, task_index, ids, nodes }
    }

    /// Archetype the chunk belongs to.
    #[inline]
    pub fn archetype(&self) -> ArchetypeID {
        self.archetype
    }

    /// First archetype slot covered by the chunk.
    #[inline]
    pub fn start(&self) -> usize {
        self.start
    }

    /// Index of the job task processing this chunk; `0` outside jobs.
    #[inline]
    pub fn task_index(&self) -> usize {
        self.task_index
    }

    /// Number of records in the chunk.
    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns `true` for a chunk without records.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Raw ids, aligned with the field slices.
    #[inline]
    pub fn ids(&self) -> &'a [EntityID] {
        self.ids
    }

    /// Handle of the record at chunk index `n`.
    pub fn entity(&self, n: usize) -> Option<Entity> {
        self.ids.get(n).map(|&id| self.nodes.resolve(id))
    }

    /// Handles of the chunk's records in slot order.
    pub fn iter(&self) -> impl Iterator<Item = Entity> + 'a {
        let nodes = self.nodes;
        self.ids.iter().map(move |&id| nodes.resolve(id))
    }
}

impl fmt::Debug for ChunkEntities<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkEntities")
            .field("archetype", &self.archetype)
            .field("start", &self.start)
            .field("task_index", &self.task_index)
            .field("ids", &self.ids)
            .finish()
    }
}

impl fmt::Display for ChunkEntities<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entities[{}]", self.ids.len())
    }
}

/// Shared chunk: field slices plus ids.
pub struct Chunks<'a, D: QueryData> {
    /// One slice per requested field type.
    pub components: D::Slices<'a>,
    /// Ids of the records the slices belong to.
    pub entities: ChunkEntities<'a>,
}

impl<D: QueryData> Clone for Chunks<'_, D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D: QueryData> Copy for Chunks<'_, D> {}

impl<'a, D: QueryData> Chunks<'a, D> {
    /// Number of records in the chunk.
    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` for a chunk without records.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Mutable chunk handed to job actions.
pub struct ChunksMut<'a, D: QueryData> {
    /// One mutable slice per requested field type.
    pub components: D::SlicesMut<'a>,
    /// Ids of the records the slices belong to.
    pub entities: ChunkEntities<'a>,
}

impl<'a, D: QueryData> ChunksMut<'a, D> {
    /// Number of records in the chunk.
    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` for a chunk without records.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Pull-based, restartable cursor over the chunks of a query.
///
/// Every window is resolved against the borrowed store when the enumerator
/// is created, so lookup failures surface from
/// [`Query::chunks`](crate::engine::query::Query::chunks) and iteration
/// itself cannot fail.
pub struct ChunkEnumerator<'a, D: QueryData> {
    chunks: Vec<Chunks<'a, D>>,
    ranges: Vec<ChunkRange>,
    cursor: usize,
    single_entity: bool,
    _guard: Option<LoopGuard>,
}

impl<'a, D: QueryData> ChunkEnumerator<'a, D> {
    pub(crate) fn new(
        store: &'a EntityStore,
        component_ids: &[ComponentID],
        ranges: Vec<ChunkRange>,
        single_entity: bool,
        guard: Option<LoopGuard>,
    ) -> StoreResult<Self> {
        let chunks = ranges
            .iter()
            .map(|range| resolve_chunk::<D>(store, component_ids, *range))
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(Self { chunks, ranges, cursor: 0, single_entity, _guard: guard })
    }

    /// Rewinds to the first chunk.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Yields one length-1 chunk per record.
    #[inline]
    pub fn is_single_entity(&self) -> bool {
        self.single_entity
    }

    /// Windows this enumerator walks, in order.
    #[inline]
    pub fn ranges(&self) -> &[ChunkRange] {
        &self.ranges
    }
}

fn resolve_chunk<'a, D: QueryData>(
    store: &'a EntityStore,
    component_ids: &[ComponentID],
    range: ChunkRange,
) -> StoreResult<Chunks<'a, D>> {
    let archetype = store
        .archetypes()
        .get(range.archetype as usize)
        .ok_or_else(|| StoreError::Internal(format!("unknown archetype {}", range.archetype)))?;
    let components = D::slices(archetype, component_ids, range.start, range.len)?;
    let ids = archetype
        .entity_ids()
        .get(range.start..range.end())
        .ok_or_else(|| StoreError::Internal(format!("chunk {range:?} outside archetype")))?;
    Ok(Chunks {
        components,
        entities: ChunkEntities::new(range.archetype, range.start, 0, ids, store.entity_nodes()),
    })
}

impl<'a, D: QueryData> Iterator for ChunkEnumerator<'a, D> {
    type Item = Chunks<'a, D>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = self.chunks.get(self.cursor).copied()?;
        self.cursor += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.chunks.len() - self.cursor;
        (remaining, Some(remaining))
    }
}

impl<D: QueryData> ExactSizeIterator for ChunkEnumerator<'_, D> {}

/// Mutable window carved out of one archetype for one task.
pub(crate) struct SegmentMut<'a, D: QueryData> {
    pub(crate) archetype: ArchetypeID,
    pub(crate) start: usize,
    pub(crate) slices: D::SlicesMut<'a>,
    pub(crate) ids: &'a [EntityID],
}

/// Splits the columns of `archetypes` into disjoint mutable windows.
///
/// `tasks[t]` lists the ranges of task `t`; the result holds the carved
/// windows of each task in archetype order. Ranges of one archetype must not
/// overlap.

pub(crate) fn carve_segments<'a, D: QueryData>(
    archetypes: &'a mut [Archetype],
    component_ids: &[ComponentID],
    tasks: &[Vec<ChunkRange>],
) -> StoreResult<Vec<Vec<SegmentMut<'a, D>>>> {
    let mut pending: Vec<Vec<(usize, ChunkRange)>> = vec![Vec::new(); archetypes.len()];
    for (task_index, ranges) in tasks.iter().enumerate() {
        for range in ranges {
            let slot = pending.get_mut(range.archetype as usize).ok_or_else(|| {
                StoreError::Internal(format!("unknown archetype {}", range.archetype))
            })?;
            slot.push((task_index, *range));
        }
    }

    let mut carved: Vec<Vec<SegmentMut<'a, D>>> = (0..tasks.len()).map(|_| Vec::new()).collect();
    for (archetype, mut ranges) in archetypes.iter_mut().zip(pending) {
        if ranges.is_empty() {
            continue;
        }
        ranges.sort_by_key(|(_, range)| range.start);
        let archetype_id = archetype.archetype_id();
        let length = archetype.len();
        let (heaps, ids) = archetype.heaps_many_mut(component_ids)?;
        let mut rest = D::slices_mut(heaps, 0, length)?;
        let mut rest_ids = ids;
        let mut offset = 0;

        for (task_index, range) in ranges {
            if range.start < offset || range.end() > length {
                return Err(StoreError::Internal(format!(
                    "chunk {range:?} overlaps a previous chunk or exceeds length {length}"
                )));
            }
            let (_, tail) = D::split_at_mut(rest, range.start - offset);
            let (slices, tail) = D::split_at_mut(tail, range.len);
            let (_, tail_ids) = rest_ids.split_at(range.start - offset);
            let (segment_ids, tail_ids) = tail_ids.split_at(range.len);
            rest = tail;
            rest_ids = tail_ids;
            offset = range.end();
            carved[task_index].push(SegmentMut {
                archetype: archetype_id,
                start: range.start,
                slices,
                ids: segment_ids,
            });
        }
    }
    Ok(carved)
}
