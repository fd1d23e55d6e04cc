//! Store and job configuration.
//!
//! ## Purpose
//! Runtime knobs that size the initial allocations of a store and control how
//! query jobs are spread across worker threads. Compile-time capacities (ids,
//! signature widths, query arity) live in [`types`](crate::engine::types).

/// Parallel execution settings for query jobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobConfig {
    /// Worker count. `None` uses rayon's global pool and its thread count;
    /// `Some(n)` runs jobs on a dedicated pool of `n` threads.
    pub thread_count: Option<usize>,
    /// Jobs matching fewer records than this run as a single task.
    pub min_parallel_chunk_length: usize,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self { thread_count: None, min_parallel_chunk_length: 1 }
    }
}

impl JobConfig {
    /// Runs jobs on a dedicated pool of `thread_count` workers (at least 1).
    pub fn with_thread_count(mut self, thread_count: usize) -> Self {
        self.thread_count = Some(thread_count.max(1));
        self
    }

    /// Jobs over fewer than `length` records run as one task.
    pub fn with_min_parallel_chunk_length(mut self, length: usize) -> Self {
        self.min_parallel_chunk_length = length;
        self
    }

    /// Number of tasks a job over `total` records is split into.
    pub fn task_count(&self, total: usize) -> usize {
        if total == 0 || total < self.min_parallel_chunk_length {
            return 1;
        }
        let threads = self.thread_count.unwrap_or_else(rayon::current_num_threads).max(1);
        threads.min(total)
    }
}

/// Settings of an [`EntityStore`](crate::engine::store::EntityStore).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreConfig {
    /// Entity slots reserved up front.
    pub initial_entity_capacity: usize,
    /// Slots reserved in every column of a newly created archetype.
    pub initial_heap_capacity: usize,
    /// Defaults for jobs created from this store's queries.
    pub job: JobConfig,
}

impl StoreConfig {
    /// Reserves `capacity` entity slots up front.
    pub fn with_initial_entity_capacity(mut self, capacity: usize) -> Self {
        self.initial_entity_capacity = capacity;
        self
    }

    /// Reserves `capacity` slots in each column of new archetypes.
    pub fn with_initial_heap_capacity(mut self, capacity: usize) -> Self {
        self.initial_heap_capacity = capacity;
        self
    }

    /// Default job settings for queries over this store.
    pub fn with_job(mut self, job: JobConfig) -> Self {
        self.job = job;
        self
    }
}
