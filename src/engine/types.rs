//! Core Store Types, Identifiers, and Bit-Level Layouts
//!
//! This module defines the **fundamental identifiers, capacities and bitsets**
//! shared by every other part of the store: entity bookkeeping, archetype
//! storage, query matching, chunk enumeration and parallel partitioning.
//!
//! ## Design Philosophy
//!
//! - **Dense storage**: archetypes hold one contiguous column per field type.
//! - **Bitset signatures**: field-type sets and tag sets are fixed-size `u64`
//!   arrays, compared with a handful of word operations.
//! - **Small copyable ids**: every concept (entity, archetype, component, tag)
//!   is addressed by a compact integer.
//!
//! ## Signatures
//!
//! An archetype is identified by an [`ArchetypeKey`]: the [`Signature`] of its
//! field types plus the [`Tags`] it carries. Both are instances of the same
//! [`BitSet`] with different word counts.
//!
//! ## Safety and Performance
//!
//! This module contains **no unsafe code** and performs no heap allocation.

use std::fmt;

/// Record identifier. Id `0` is reserved as the null id.
pub type EntityID = u32;
/// Per-id generation counter invalidating stale handles.
pub type Revision = u32;
/// Archetype identifier, assigned in creation order.
pub type ArchetypeID = u32;
/// Registered field type identifier.
pub type ComponentID = u16;
/// Registered tag identifier.
pub type TagID = u16;

/// Maximum number of registered field types.
pub const COMPONENT_CAP: usize = 256;
/// Number of `u64` words required to represent a full field-type signature.
pub const SIGNATURE_SIZE: usize = (COMPONENT_CAP + 63) / 64;

/// Maximum number of registered tag types.
pub const TAG_CAP: usize = 128;
/// Number of `u64` words required to represent a full tag set.
pub const TAG_WORDS: usize = (TAG_CAP + 63) / 64;

/// Largest number of field types a single typed query may request.
pub const QUERY_ARITY_MAX: usize = 5;

/// Fixed-size bitset over small integer ids.
///
/// ## Invariants
/// Bits at positions `>= WORDS * 64` do not exist; callers keep ids below the
/// matching capacity constant.

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitSet<const WORDS: usize> {
    words: [u64; WORDS],
}

/// Set of field types, one bit per [`ComponentID`].
pub type Signature = BitSet<SIGNATURE_SIZE>;

/// Set of tags, one bit per [`TagID`].
pub type Tags = BitSet<TAG_WORDS>;

impl<const WORDS: usize> Default for BitSet<WORDS> {
    fn default() -> Self {
        Self { words: [0u64; WORDS] }
    }
}

impl<const WORDS: usize> BitSet<WORDS> {
    /// Creates an empty set.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from a list of ids.
    pub fn from_ids(ids: &[u16]) -> Self {
        let mut set = Self::default();
        for &id in ids {
            set.set(id);
        }
        set
    }

    /// Sets the bit corresponding to `id`.
    #[inline]
    pub fn set(&mut self, id: u16) {
        let index = (id as usize) / 64;
        let bits = (id as usize) % 64;
        self.words[index] |= 1u64 << bits;
    }

    /// Clears the bit corresponding to `id`.
    #[inline]
    pub fn clear(&mut self, id: u16) {
        let index = (id as usize) / 64;
        let bits = (id as usize) % 64;
        self.words[index] &= !(1u64 << bits);
    }

    /// Returns `true` if `id` is present.
    #[inline]
    pub fn has(&self, id: u16) -> bool {
        let index = (id as usize) / 64;
        let bits = (id as usize) % 64;
        (self.words[index] >> bits) & 1 == 1
    }

    /// Returns a copy of this set with `id` added.
    #[inline]
    pub fn with(mut self, id: u16) -> Self {
        self.set(id);
        self
    }

    /// Returns a copy of this set with `id` removed.
    #[inline]
    pub fn without(mut self, id: u16) -> Self {
        self.clear(id);
        self
    }

    /// Returns `true` if every id in `other` is present in `self`.
    #[inline]
    pub fn contains_all(&self, other: &Self) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(a, b)| (a & b) == *b)
    }

    /// Returns `true` if `self` and `other` share at least one id.
    #[inline]
    pub fn intersects(&self, other: &Self) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .any(|(a, b)| (a & b) != 0)
    }

    /// Returns the union of both sets.
    #[inline]
    pub fn union(mut self, other: &Self) -> Self {
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            *a |= *b;
        }
        self
    }

    /// Returns `true` if no id is set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Number of ids in the set.
    #[inline]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Iterates over all ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.words
            .iter()
            .enumerate()
            .flat_map(|(word_index, &word)| {
                let base = word_index * 64;
                let mut bits = word;
                std::iter::from_fn(move || {
                    if bits == 0 {
                        return None;
                    }
                    let tz = bits.trailing_zeros() as usize;
                    bits &= bits - 1;
                    Some((base + tz) as u16)
                })
            })
    }
}

impl<const WORDS: usize> fmt::Debug for BitSet<WORDS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Identity of an archetype: its exact field-type set plus its exact tag set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ArchetypeKey {
    /// Field types stored in the archetype.
    pub components: Signature,
    /// Tags shared by every record of the archetype.
    pub tags: Tags,
}

impl ArchetypeKey {
    /// Creates a key from a field-type signature and a tag set.
    #[inline]
    pub fn new(components: Signature, tags: Tags) -> Self {
        Self { components, tags }
    }
}

/// Contiguous window `[start, start + len)` into one archetype.
///
/// Produced by query matching and consumed by the chunk enumerator, the
/// per-record callback path and the parallel partitioner.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkRange {
    /// Archetype owning the window.
    pub archetype: ArchetypeID,
    /// First slot of the window.
    pub start: usize,
    /// Number of slots in the window.
    pub len: usize,
}

impl ChunkRange {
    /// Creates a new range.
    #[inline]
    pub fn new(archetype: ArchetypeID, start: usize, len: usize) -> Self {
        Self { archetype, start, len }
    }

    /// One past the last slot of the window.
    #[inline]
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}
