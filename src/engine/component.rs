//! # Type Registry
//!
//! This module provides the process-wide registry that assigns stable
//! [`ComponentID`] and [`TagID`] values to Rust types, and the factories an
//! archetype or store uses to allocate column storage and value indices for a
//! registered field type.
//!
//! ## Purpose
//! The registry replaces runtime type inspection: every field type and tag is
//! registered explicitly at startup, with its size, alignment and (for indexed
//! field types) the index strategy to maintain. Hot paths only ever see ids.
//!
//! ## Design
//! - Field types and tags live in separate id spaces.
//! - Tag `0` is always the built-in [`Disabled`] tag.
//! - Registration is idempotent: registering a type twice returns its id.
//! - The registry can be frozen after setup; unknown types are then rejected.
//!
//! ## Invariants
//! - Every registered field type has a heap factory.
//! - A field type has an index factory iff it was registered through
//!   [`register_indexed_component`].
//!
//! ## Concurrency
//! The registry sits behind a `parking_lot::RwLock`: concurrent lookups,
//! serialized registration.

use std::any::{type_name, Any, TypeId};
use std::mem::{align_of, size_of};
use std::sync::OnceLock;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::engine::error::{RegistryError, StoreResult};
use crate::engine::index::{new_index_storage, ErasedIndex, IndexedComponent};
use crate::engine::storage::{ErasedHeap, Heap};
use crate::engine::types::{ComponentID, Signature, TagID, Tags, COMPONENT_CAP, TAG_CAP};

/// Any type storable as a field.
pub trait Component: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Component for T {}

/// Built-in tag excluded from queries unless `with_disabled` is requested.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Disabled;

/// Tag id of [`Disabled`].
pub const DISABLED_TAG: TagID = 0;

type HeapFactory = fn() -> Box<dyn ErasedHeap>;
type IndexFactory = fn() -> Box<dyn ErasedIndex>;

fn new_heap_storage<T: Component>() -> Box<dyn ErasedHeap> {
    Box::new(Heap::<T>::default())
}

/// Strips module paths from a type name, keeping generic arguments intact.
pub(crate) fn short_type_name(full: &'static str) -> &'static str {
    let head = full.split('<').next().unwrap_or(full);
    match head.rfind("::") {
        Some(position) => &full[position + 2..],
        None => full,
    }
}

/// Describes a registered field type.
///
/// ## Fields
/// - `component_id`: identifier assigned by the registry.
/// - `name`: short Rust type name, used in error messages.
/// - `type_id`, `size`, `align`: layout of the type.
/// - `indexed`: a value index is maintained for this type.
/// - `links`: the index is a record-reference index with incoming links.

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ComponentDesc {
    /// Registered id; also the bit position in signatures.
    pub component_id: ComponentID,
    /// Short type name used in errors and logs.
    pub name: &'static str,
    /// `TypeId` of the field type.
    pub type_id: TypeId,
    /// `size_of` the field type.
    pub size: usize,
    /// `align_of` the field type.
    pub align: usize,
    /// A value index is maintained for this type.
    pub indexed: bool,
    /// The index tracks record references.
    pub links: bool,
}

impl ComponentDesc {
    /// Descriptor for `T` with `component_id = 0`; finalize with `with_id`.
    #[inline]
    pub fn of<T: 'static>() -> Self {
        Self {
            component_id: 0,
            name: short_type_name(type_name::<T>()),
            type_id: TypeId::of::<T>(),
            size: size_of::<T>(),
            align: align_of::<T>(),
            indexed: false,
            links: false,
        }
    }

    /// Sets the registered id.
    #[inline]
    pub fn with_id(mut self, component_id: ComponentID) -> Self {
        self.component_id = component_id;
        self
    }

    /// Returns `true` if this descriptor belongs to `T`.
    #[inline]
    pub fn matches_type<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl std::fmt::Display for ComponentDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ComponentDesc {{ id: {}, name: {}, size: {}, align: {}, indexed: {} }}",
            self.component_id, self.name, self.size, self.align, self.indexed
        )
    }
}

/// Describes a registered tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TagDesc {
    /// Registered id; also the bit position in tag sets.
    pub tag_id: TagID,
    /// Short type name.
    pub name: &'static str,
    /// `TypeId` of the tag type.
    pub type_id: TypeId,
}

struct ComponentEntry {
    desc: ComponentDesc,
    heap_factory: HeapFactory,
    index_factory: Option<IndexFactory>,
}

/// Global mapping between Rust types and compact ids.
///
/// ## Invariants
/// - Every entry in `by_type` has a matching `components[id]`.
/// - Ids are dense and allocated in registration order.

struct TypeRegistry {
    by_type: FxHashMap<TypeId, ComponentID>,
    components: Vec<ComponentEntry>,
    tags_by_type: FxHashMap<TypeId, TagID>,
    tags: Vec<TagDesc>,
    frozen: bool,
}

static REGISTRY: OnceLock<RwLock<TypeRegistry>> = OnceLock::new();

fn type_registry() -> &'static RwLock<TypeRegistry> {
    REGISTRY.get_or_init(|| {
        let mut registry = TypeRegistry {
            by_type: FxHashMap::default(),
            components: Vec::new(),
            tags_by_type: FxHashMap::default(),
            tags: Vec::new(),
            frozen: false,
        };
        registry.tags_by_type.insert(TypeId::of::<Disabled>(), DISABLED_TAG);
        registry.tags.push(TagDesc {
            tag_id: DISABLED_TAG,
            name: short_type_name(type_name::<Disabled>()),
            type_id: TypeId::of::<Disabled>(),
        });
        RwLock::new(registry)
    })
}

impl TypeRegistry {
    fn register<T: Component>(&mut self, index_factory: Option<IndexFactory>, links: bool) -> StoreResult<ComponentID> {
        let type_id = TypeId::of::<T>();
        if let Some(&existing) = self.by_type.get(&type_id) {
            let entry = &mut self.components[existing as usize];
            if index_factory.is_some() && entry.index_factory.is_none() {
                if self.frozen {
                    return Err(RegistryError::Frozen { name: type_name::<T>() }.into());
                }
                entry.index_factory = index_factory;
                entry.desc.indexed = true;
                entry.desc.links = links;
            }
            return Ok(existing);
        }
        if self.frozen {
            return Err(RegistryError::Frozen { name: type_name::<T>() }.into());
        }
        if self.components.len() >= COMPONENT_CAP {
            return Err(RegistryError::ComponentCapacity { name: type_name::<T>() }.into());
        }

        let id = self.components.len() as ComponentID;
        let mut desc = ComponentDesc::of::<T>().with_id(id);
        desc.indexed = index_factory.is_some();
        desc.links = links;
        self.by_type.insert(type_id, id);
        self.components.push(ComponentEntry {
            desc,
            heap_factory: new_heap_storage::<T>,
            index_factory,
        });
        Ok(id)
    }

    fn register_tag<T: 'static>(&mut self) -> StoreResult<TagID> {
        let type_id = TypeId::of::<T>();
        if let Some(&existing) = self.tags_by_type.get(&type_id) {
            return Ok(existing);
        }
        if self.frozen {
            return Err(RegistryError::Frozen { name: type_name::<T>() }.into());
        }
        if self.tags.len() >= TAG_CAP {
            return Err(RegistryError::TagCapacity { name: type_name::<T>() }.into());
        }
        let tag_id = self.tags.len() as TagID;
        self.tags_by_type.insert(type_id, tag_id);
        self.tags.push(TagDesc { tag_id, name: short_type_name(type_name::<T>()), type_id });
        Ok(tag_id)
    }
}

/// Registers field type `T` and returns its `ComponentID`.
///
/// ## Errors
/// - [`RegistryError::Frozen`] if `T` is new and the registry is frozen.
/// - [`RegistryError::ComponentCapacity`] if [`COMPONENT_CAP`] is exceeded.

pub fn register_component<T: Component>() -> StoreResult<ComponentID> {
    type_registry().write().register::<T>(None, false)
}

/// Registers field type `C` together with the value index it maintains.
///
/// Registering a type already known as a plain field type upgrades it to an
/// indexed one, provided the registry is not frozen.

pub fn register_indexed_component<C: IndexedComponent>() -> StoreResult<ComponentID> {
    let links = <C::Index as crate::engine::index::ComponentIndex<C::Value>>::LINKS;
    type_registry()
        .write()
        .register::<C>(Some(new_index_storage::<C>), links)
}

/// Registers tag type `T` and returns its `TagID`.
pub fn register_tag<T: 'static>() -> StoreResult<TagID> {
    type_registry().write().register_tag::<T>()
}

/// Freezes the registry; later registrations of new types fail.
pub fn freeze_registry() {
    type_registry().write().frozen = true;
}

/// Returns `true` once [`freeze_registry`] was called.
pub fn is_registry_frozen() -> bool {
    type_registry().read().frozen
}

/// Returns the registered `ComponentID` for `T`.
///
/// ## Errors
/// [`RegistryError::UnregisteredComponent`] if `T` was never registered.

pub fn component_id_of<T: 'static>() -> StoreResult<ComponentID> {
    type_registry()
        .read()
        .by_type
        .get(&TypeId::of::<T>())
        .copied()
        .ok_or_else(|| RegistryError::UnregisteredComponent { name: type_name::<T>() }.into())
}

/// Returns the registered `TagID` for `T`.
pub fn tag_id_of<T: 'static>() -> StoreResult<TagID> {
    type_registry()
        .read()
        .tags_by_type
        .get(&TypeId::of::<T>())
        .copied()
        .ok_or_else(|| RegistryError::UnregisteredTag { name: type_name::<T>() }.into())
}

/// Copy of the descriptor for `component_id`, if registered.
pub fn component_desc(component_id: ComponentID) -> Option<ComponentDesc> {
    type_registry()
        .read()
        .components
        .get(component_id as usize)
        .map(|entry| entry.desc)
}

/// Copy of the descriptor for `tag_id`, if registered.
pub fn tag_desc(tag_id: TagID) -> Option<TagDesc> {
    type_registry().read().tags.get(tag_id as usize).copied()
}

/// Short name of a registered field type, `"?"` when unknown.
pub(crate) fn component_name(component_id: ComponentID) -> &'static str {
    component_desc(component_id).map(|desc| desc.name).unwrap_or("?")
}

/// Creates an empty column for `component_id`.
pub(crate) fn make_empty_heap(component_id: ComponentID) -> StoreResult<Box<dyn ErasedHeap>> {
    let registry = type_registry().read();
    let entry = registry.components.get(component_id as usize).ok_or_else(|| {
        RegistryError::UnregisteredComponent { name: "<unknown component id>" }
    })?;
    Ok((entry.heap_factory)())
}

/// Creates an empty value index for `component_id`, if the type is indexed.
pub(crate) fn make_index(component_id: ComponentID) -> Option<Box<dyn ErasedIndex>> {
    let registry = type_registry().read();
    registry
        .components
        .get(component_id as usize)
        .and_then(|entry| entry.index_factory)
        .map(|factory| factory())
}

/// Tuple of field types, e.g. `(Position, Velocity)`.
pub trait ComponentSet {
    /// Ids of the member types, in tuple order.
    fn component_ids() -> StoreResult<SmallVec<[ComponentID; 8]>>;
}

/// Tuple of tag types, e.g. `(Hostile, Flying)`.
pub trait TagSet {
    /// Ids of the member tags, in tuple order.
    fn tag_ids() -> StoreResult<SmallVec<[TagID; 8]>>;
}

macro_rules! impl_type_sets {
    ($($name:ident),+) => {
        impl<$($name: Component),+> ComponentSet for ($($name,)+) {
            fn component_ids() -> StoreResult<SmallVec<[ComponentID; 8]>> {
                Ok(smallvec::smallvec![$(component_id_of::<$name>()?),+])
            }
        }

        impl<$($name: 'static),+> TagSet for ($($name,)+) {
            fn tag_ids() -> StoreResult<SmallVec<[TagID; 8]>> {
                Ok(smallvec::smallvec![$(tag_id_of::<$name>()?),+])
            }
        }
    };
}

impl_type_sets!(A);
impl_type_sets!(A, B);
impl_type_sets!(A, B, C);
impl_type_sets!(A, B, C, D);
impl_type_sets!(A, B, C, D, E);
impl_type_sets!(A, B, C, D, E, F);

/// Signature of a tuple of field types.
pub fn component_types<S: ComponentSet>() -> StoreResult<Signature> {
    Ok(Signature::from_ids(&S::component_ids()?))
}

/// Tag set of a tuple of tag types.
pub fn tag_set<S: TagSet>() -> StoreResult<Tags> {
    Ok(Tags::from_ids(&S::tag_ids()?))
}

/// Heterogeneous field values used to create a record directly in its
/// target archetype.
#[derive(Default)]
pub struct Bundle {
    signature: Signature,
    values: Vec<(ComponentID, Box<dyn Any + Send>)>,
}

impl Bundle {
    /// Empty bundle.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the value for `T`.
    pub fn insert<T: Component>(&mut self, value: T) -> StoreResult<()> {
        let component_id = component_id_of::<T>()?;
        if self.signature.has(component_id) {
            self.values.retain(|(id, _)| *id != component_id);
        }
        self.signature.set(component_id);
        self.values.push((component_id, Box::new(value)));
        Ok(())
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with<T: Component>(mut self, value: T) -> StoreResult<Self> {
        self.insert(value)?;
        Ok(self)
    }

    /// Field types present in the bundle.
    #[inline]
    pub fn signature(&self) -> Signature {
        self.signature
    }

    /// Number of field values.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` when the bundle holds no value.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Field values in insertion order.
    pub(crate) fn values(&self) -> impl Iterator<Item = (ComponentID, &(dyn Any + Send))> + '_ {
        self.values.iter().map(|(id, value)| (*id, value.as_ref()))
    }

    /// Removes and returns the value for `component_id`, if present.
    pub fn take(&mut self, component_id: ComponentID) -> Option<Box<dyn Any + Send>> {
        let index = self.values.iter().position(|(id, _)| *id == component_id)?;
        let (_, value) = self.values.swap_remove(index);
        self.signature.clear(component_id);
        Some(value)
    }
}
