//! # Archetype Store
//!
//! In-memory record store that groups records by their exact set of field
//! types into columnar archetypes, with a query engine over those archetypes
//! and value indices mapping field values back to records.
//!
//! ## Design Goals
//! - Archetype-based columnar storage for cache efficiency
//! - Stable, creation-ordered query matching
//! - Parallel chunk jobs over disjoint mutable windows
//! - Value indices kept consistent across every destructive mutation,
//!   including cascading removal of links to deleted records
//!
//! ## Example
//! ```ignore
//! use archetype_store::prelude::*;
//!
//! register_component::<Position>()?;
//! register_indexed_component::<Team>()?;
//!
//! let mut store = EntityStore::new();
//! let unit = store.create_entity_with(Bundle::new().with(Position::default())?.with(Team(1))?)?;
//!
//! let mut query = store.query::<(Position,)>()?.has_value::<Team>(1)?;
//! query.for_each_entity(&mut store, |(position,), _| position.x += 1.0)?;
//! ```

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod engine;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

pub use engine::store::{ComponentVisitor, EntityStore};

pub use engine::entity::{Entity, EntityLocation};

pub use engine::component::{
    component_desc,
    component_id_of,
    component_types,
    freeze_registry,
    is_registry_frozen,
    register_component,
    register_indexed_component,
    register_tag,
    tag_id_of,
    tag_set,
    Bundle,
    Component,
    ComponentDesc,
    Disabled,
};

pub use engine::index::{
    ComponentIndex,
    EntityIds,
    EntityIndex,
    HashedIndex,
    IndexedComponent,
    OrderedIndex,
    Values,
};

pub use engine::query::{Query, QueryData, QueryFilter};
pub use engine::chunks::{ChunkEntities, ChunkEnumerator, Chunks, ChunksMut, LoopGuard};
pub use engine::parallel::{partition_ranges, QueryJob};
pub use engine::config::{JobConfig, StoreConfig};

pub use engine::error::{
    EntityError,
    HeapError,
    IndexError,
    JobError,
    QueryError,
    RegistryError,
    StoreError,
    StoreResult,
    TaskFailure,
};

pub use engine::types::{
    ArchetypeID,
    ChunkRange,
    ComponentID,
    EntityID,
    Signature,
    TagID,
    Tags,
};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used store types.
///
/// Import with:
/// ```rust
/// use archetype_store::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        component_types,
        register_component,
        register_indexed_component,
        register_tag,
        tag_set,
        Bundle,
        ChunksMut,
        EntityIndex,
        Entity,
        EntityStore,
        HashedIndex,
        IndexedComponent,
        OrderedIndex,
        StoreError,
        StoreResult,
    };
}
