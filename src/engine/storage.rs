//! Dense column storage and type-erased access for archetype field data.
//!
//! This module implements [`Heap<T>`], the column holding one field type's
//! values for one archetype, and [`ErasedHeap`], the object-safe interface an
//! archetype uses to manage its heterogeneous columns.
//!
//! # Storage model
//!
//! A heap is a single contiguous `Vec<T>`. Slot `n` of every heap in an
//! archetype belongs to the record at slot `n` of the archetype's id column,
//! so an archetype contributes exactly one chunk to iteration.
//!
//! # Core operations
//!
//! - **Append**: `push` writes at the end; capacity grows by doubling and
//!   never shrinks.
//! - **Remove**: `swap_remove` deletes in `O(1)` by moving the last element
//!   into the removed slot (unless the removed slot is already last).
//! - **Transfer**: `push_from` moves a value from one heap into another,
//!   performing swap-remove in the source.
//!
//! These operations keep columns densely packed but do **not** preserve
//! element order.
//!
//! # Type erasure
//!
//! [`ErasedHeap`] exposes the element [`TypeId`] and name, downcasting hooks
//! and mutation APIs mirroring the typed ones (`push_dyn`, `swap_remove_dyn`,
//! `push_from_dyn`). Every downcast is checked; a mismatch yields
//! [`HeapError::TypeMismatch`] instead of undefined behaviour.

use std::any::{type_name, Any, TypeId};

use crate::engine::error::{HeapError, StoreError, StoreResult};

/// Contiguous column of `T` values.
#[derive(Debug)]
pub struct Heap<T> {
    values: Vec<T>,
}

impl<T> Default for Heap<T> {
    fn default() -> Self {
        Self { values: Vec::new() }
    }
}

impl<T> Heap<T> {
    /// Creates an empty heap with room for `capacity` values.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { values: Vec::with_capacity(capacity) }
    }

    /// Number of stored values.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` when no value is stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Allocated slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.values.capacity()
    }

    /// Appends a value and returns its slot.
    #[inline]
    pub fn push(&mut self, value: T) -> usize {
        self.values.push(value);
        self.values.len() - 1
    }

    /// Removes the value at `row` by moving the last value into its place.
    ///
    /// ## Returns
    /// The removed value and, if a move happened, the slot the moved value
    /// came from (always the former last slot).

    pub fn swap_remove(&mut self, row: usize) -> Result<(T, Option<usize>), HeapError> {
        let length = self.values.len();
        if row >= length {
            return Err(HeapError::OutOfBounds { row, length });
        }
        let last = length - 1;
        let value = self.values.swap_remove(row);
        let moved_from = if row != last { Some(last) } else { None };
        Ok((value, moved_from))
    }

    /// Moves the value at `row` of `source` to the end of `self`.
    ///
    /// ## Returns
    /// `(destination_row, moved_from)` where `moved_from` is the source slot
    /// whose value was swapped into `row`, if any.

    pub fn push_from(
        &mut self,
        source: &mut Heap<T>,
        row: usize,
    ) -> Result<(usize, Option<usize>), HeapError> {
        let (value, moved_from) = source.swap_remove(row)?;
        Ok((self.push(value), moved_from))
    }

    /// Value at `row`.
    #[inline]
    pub fn get(&self, row: usize) -> Option<&T> {
        self.values.get(row)
    }

    /// Mutable value at `row`.
    #[inline]
    pub fn get_mut(&mut self, row: usize) -> Option<&mut T> {
        self.values.get_mut(row)
    }

    /// Shared view of `len` values starting at `start`.
    pub fn slice(&self, start: usize, len: usize) -> Result<&[T], HeapError> {
        let length = self.values.len();
        self.values
            .get(start..start + len)
            .ok_or(HeapError::OutOfBounds { row: start + len, length })
    }

    /// Mutable view of `len` values starting at `start`.
    pub fn slice_mut(&mut self, start: usize, len: usize) -> Result<&mut [T], HeapError> {
        let length = self.values.len();
        self.values
            .get_mut(start..start + len)
            .ok_or(HeapError::OutOfBounds { row: start + len, length })
    }

    /// All values in slot order.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.values
    }

    /// Iterator over all values in slot order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.values.iter()
    }
}

/// Object-safe interface over a [`Heap<T>`] of unknown `T`.
///
/// ## Invariants
/// Every method that receives a value or another heap checks that its element
/// type matches before touching storage.

pub trait ErasedHeap: Any + Send + Sync {
    /// Number of stored values.
    fn len(&self) -> usize;

    /// Returns `true` when no value is stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns an immutable type-erased reference for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Returns a mutable type-erased reference for downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// `TypeId` of the element type.
    fn element_type_id(&self) -> TypeId;

    /// Human-readable element type name.
    fn element_type_name(&self) -> &'static str;

    /// Reserves room for `additional` values.
    fn reserve(&mut self, additional: usize);

    /// Shared type-erased reference to the value at `row`.
    fn get_dyn(&self, row: usize) -> Option<&dyn Any>;

    /// Appends a boxed value of the element type.
    fn push_dyn(&mut self, value: Box<dyn Any + Send>) -> Result<usize, HeapError>;

    /// Removes the value at `row` by swap-remove, dropping it.
    fn swap_remove_dyn(&mut self, row: usize) -> Result<Option<usize>, HeapError>;

    /// Moves the value at `row` of `source` to the end of `self`.
    fn push_from_dyn(
        &mut self,
        source: &mut dyn ErasedHeap,
        row: usize,
    ) -> Result<(usize, Option<usize>), HeapError>;

    /// Empty heap of the same element type.
    fn new_empty(&self) -> Box<dyn ErasedHeap>;
}

impl<T: Send + Sync + 'static> ErasedHeap for Heap<T> {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn element_type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn element_type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn reserve(&mut self, additional: usize) {
        self.values.reserve(additional);
    }

    fn get_dyn(&self, row: usize) -> Option<&dyn Any> {
        self.values.get(row).map(|value| value as &dyn Any)
    }

    fn push_dyn(&mut self, value: Box<dyn Any + Send>) -> Result<usize, HeapError> {
        let value = value
            .downcast::<T>()
            .map_err(|_| HeapError::TypeMismatch { expected: type_name::<T>() })?;
        Ok(self.push(*value))
    }

    fn swap_remove_dyn(&mut self, row: usize) -> Result<Option<usize>, HeapError> {
        self.swap_remove(row).map(|(_, moved_from)| moved_from)
    }

    fn push_from_dyn(
        &mut self,
        source: &mut dyn ErasedHeap,
        row: usize,
    ) -> Result<(usize, Option<usize>), HeapError> {
        let source = source
            .as_any_mut()
            .downcast_mut::<Heap<T>>()
            .ok_or(HeapError::TypeMismatch { expected: type_name::<T>() })?;
        self.push_from(source, row)
    }

    fn new_empty(&self) -> Box<dyn ErasedHeap> {
        Box::new(Heap::<T>::default())
    }
}

/// Mutable borrow of one column, as handed out by multi-column borrows.
pub type HeapMut<'a> = &'a mut (dyn ErasedHeap + 'static);

/// Downcasts a shared erased heap to its typed form.
pub fn downcast_heap<T: Send + Sync + 'static>(heap: &dyn ErasedHeap) -> StoreResult<&Heap<T>> {
    let expected = heap.element_type_name();
    heap.as_any()
        .downcast_ref::<Heap<T>>()
        .ok_or_else(|| HeapError::TypeMismatch { expected }.into())
}

/// Downcasts a mutable erased heap to its typed form.
pub fn downcast_heap_mut<'a, T: Send + Sync + 'static>(
    heap: Option<HeapMut<'a>>,
) -> StoreResult<&'a mut Heap<T>> {
    let heap = heap.ok_or_else(|| {
        StoreError::Internal(format!("missing column for `{}`", type_name::<T>()))
    })?;
    let expected = heap.element_type_name();
    heap.as_any_mut()
        .downcast_mut::<Heap<T>>()
        .ok_or_else(|| HeapError::TypeMismatch { expected }.into())
}
