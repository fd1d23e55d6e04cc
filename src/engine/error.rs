//! Error types for the store.
//!
//! ## Purpose
//! Errors are layered by subsystem. Each layer has its own enum carrying the
//! ids and type names needed to diagnose a failure without inspecting store
//! internals; [`StoreError`] folds all of them together and is the error type
//! of every public operation.
//!
//! ## Taxonomy
//! - **Usage errors**: frozen query mutation, foreign or stale handles,
//!   unregistered types, range filters on unordered indices.
//! - **Consistency violations**: [`IndexError::ValueNotFound`], raised when an
//!   indexed value was changed without going through index maintenance.
//! - **Structural change during iteration**:
//!   [`StoreError::StructuralChangeDuringIteration`].
//! - **Parallel task failure**: [`JobError::TasksFailed`], reported after all
//!   tasks have completed.

use std::fmt;

use thiserror::Error;

use crate::engine::entity::Entity;
use crate::engine::types::{EntityID, COMPONENT_CAP, TAG_CAP};

/// Result alias used by all store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failures of the process-wide type registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Registration was attempted after [`freeze_registry`](crate::engine::component::freeze_registry).
    #[error("registry is frozen; cannot register `{name}`")]
    Frozen {
        /// Type that was being registered.
        name: &'static str,
    },

    /// Too many field types.
    #[error("component capacity of {} exceeded while registering `{name}`", COMPONENT_CAP)]
    ComponentCapacity {
        /// Type that was being registered.
        name: &'static str,
    },

    /// Too many tag types.
    #[error("tag capacity of {} exceeded while registering `{name}`", TAG_CAP)]
    TagCapacity {
        /// Type that was being registered.
        name: &'static str,
    },

    /// The field type was never registered.
    #[error("component type `{name}` is not registered")]
    UnregisteredComponent {
        /// Type that was looked up.
        name: &'static str,
    },

    /// The tag type was never registered.
    #[error("tag type `{name}` is not registered")]
    UnregisteredTag {
        /// Type that was looked up.
        name: &'static str,
    },
}

/// Failures related to record handles and record placement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityError {
    /// Handle is null, was never issued, or its revision is outdated.
    #[error("stale or invalid entity handle {entity}")]
    Stale {
        /// Offending handle.
        entity: Entity,
    },

    /// An explicit id was requested that is currently alive.
    #[error("entity id {id} is already in use")]
    IdInUse {
        /// Requested id.
        id: EntityID,
    },

    /// The id space is exhausted or the requested id is reserved.
    #[error("entity id {id} cannot be allocated")]
    InvalidId {
        /// Requested id.
        id: u64,
    },

    /// The record does not carry the requested field type.
    #[error("entity {entity} has no component `{component}`")]
    MissingComponent {
        /// Record that was accessed.
        entity: Entity,
        /// Short name of the field type.
        component: &'static str,
    },
}

/// Failures of a single column.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    /// Slot index outside `[0, length)`.
    #[error("slot {row} out of bounds (length {length})")]
    OutOfBounds {
        /// Requested slot.
        row: usize,
        /// Column length.
        length: usize,
    },

    /// Value or column of a different element type.
    #[error("type mismatch: column stores `{expected}`")]
    TypeMismatch {
        /// Element type of the column.
        expected: &'static str,
    },
}

/// Misuse of the query construction surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// A predicate was added after `freeze_filter`.
    #[error("query filter is frozen")]
    Frozen,

    /// The query was created by another store.
    #[error("query belongs to store {expected}, used with store {actual}")]
    ForeignStore {
        /// Store that created the query.
        expected: u64,
        /// Store it was used with.
        actual: u64,
    },

    /// The same field type was requested twice.
    #[error("component `{component}` requested more than once")]
    DuplicateComponent {
        /// Short name of the field type.
        component: &'static str,
    },

    /// A value filter was requested on a field type without an index.
    #[error("component `{component}` is not indexed")]
    NotIndexed {
        /// Short name of the field type.
        component: &'static str,
    },

    /// A range filter was requested on an index without value ordering.
    #[error("value range requires ordered values; index of `{component}` is not comparable")]
    NotComparable {
        /// Short name of the field type.
        component: &'static str,
    },
}

/// Index consistency failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    /// The record's current field value has no matching index entry.
    #[error(
        "Indexed value of '{component}' not found. Reason: indexed values must not be mutated \
         outside the index-maintenance path (entity {entity})"
    )]
    ValueNotFound {
        /// Short name of the indexed field type.
        component: &'static str,
        /// Record whose value was not found.
        entity: EntityID,
    },
}

/// One failed task of a parallel job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    /// Index of the task that failed.
    pub task_index: usize,
    /// Error or panic message produced by the task.
    pub message: String,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {}: {}", self.task_index, self.message)
    }
}

/// Failures of a query job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// One or more tasks returned an error or panicked.
    #[error("{} job task(s) failed: {}", .failures.len(), join_failures(.failures))]
    TasksFailed {
        /// Failures ordered by task index.
        failures: Vec<TaskFailure>,
    },

    /// The dedicated thread pool could not be built.
    #[error("failed to build job thread pool: {0}")]
    ThreadPool(String),
}

fn join_failures(failures: &[TaskFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Top-level error of every store operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Registry failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Handle or placement failure.
    #[error(transparent)]
    Entity(#[from] EntityError),

    /// Column failure.
    #[error(transparent)]
    Heap(#[from] HeapError),

    /// Query misuse.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Index consistency violation.
    #[error(transparent)]
    Index(#[from] IndexError),

    /// Parallel job failure.
    #[error(transparent)]
    Job(#[from] JobError),

    /// A structural change was attempted while loops are active on the store.
    #[error("structural change rejected: {active} change-detecting loop(s) active on this store")]
    StructuralChangeDuringIteration {
        /// Number of active loop guards.
        active: usize,
    },

    /// Broken internal bookkeeping.
    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Returns `true` for index consistency violations.
    pub fn is_consistency_violation(&self) -> bool {
        matches!(self, StoreError::Index(_))
    }
}
