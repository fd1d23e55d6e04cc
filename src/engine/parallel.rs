//! Parallel query jobs.
//!
//! ## Purpose
//! A [`QueryJob`] runs a user action on every chunk matched by a query, either
//! on the calling thread or split across rayon workers.
//!
//! ## Partitioning
//! The matched chunk windows are split into contiguous task ranges holding
//! `ceil(total / task_count)` records each (the last task may hold fewer). A
//! window straddling a task boundary is cut in two, so a task may receive
//! several partial windows from different archetypes. Every record is covered
//! by exactly one task.
//!
//! ## Failure model
//! Each task stops at its first failing chunk. A returned error and a panic
//! are both recorded as a [`TaskFailure`]; once all tasks have completed the
//! failures are reported together, ordered by task index, as
//! [`JobError::TasksFailed`].
//!
//! ## Aliasing
//! Tasks receive disjoint mutable windows carved with `split_at_mut`; no two
//! tasks ever observe the same slot.

use std::any::Any;
use std::fmt::Display;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};

use rayon::prelude::*;
use tracing::{debug, trace};

use crate::engine::chunks::{carve_segments, ChunkEntities, ChunksMut, SegmentMut};
use crate::engine::config::JobConfig;
use crate::engine::entity::EntityNodes;
use crate::engine::error::{JobError, StoreResult, TaskFailure};
use crate::engine::query::{Query, QueryData};
use crate::engine::store::EntityStore;
use crate::engine::types::ChunkRange;

/// Splits `ranges` into at most `task_count` contiguous groups of
/// `ceil(total / task_count)` records.
///
/// ## Returns
/// One entry per task; empty when `ranges` holds no record.

pub fn partition_ranges(ranges: &[ChunkRange], task_count: usize) -> Vec<Vec<ChunkRange>> {
    let total: usize = ranges.iter().map(|range| range.len).sum();
    if total == 0 {
        return Vec::new();
    }
    let task_count = task_count.clamp(1, total);
    let per_task = total.div_ceil(task_count);

    let mut tasks = Vec::with_capacity(task_count);
    let mut current = Vec::new();
    let mut room = per_task;
    for range in ranges {
        let mut start = range.start;
        let mut remaining = range.len;
        while remaining > 0 {
            let take = remaining.min(room);
            current.push(ChunkRange::new(range.archetype, start, take));
            start += take;
            remaining -= take;
            room -= take;
            if room == 0 {
                tasks.push(std::mem::take(&mut current));
                room = per_task;
            }
        }
    }
    if !current.is_empty() {
        tasks.push(current);
    }
    tasks
}

/// Deferred execution of an action over the chunks of a query.
///
/// Created by [`Query::for_each`]. Nothing runs until [`run`](Self::run) or
/// [`run_parallel`](Self::run_parallel) is called.

pub struct QueryJob<'q, D, F, E>
where
    D: QueryData,
{
    query: &'q mut Query<D>,
    action: F,
    config: Option<JobConfig>,
    _error: PhantomData<fn() -> E>,
}

impl<'q, D, F, E> QueryJob<'q, D, F, E>
where
    D: QueryData,
    F: for<'c> Fn(ChunksMut<'c, D>) -> Result<(), E> + Send + Sync,
    E: Display,
{
    pub(crate) fn new(query: &'q mut Query<D>, action: F) -> Self {
        Self { query, action, config: None, _error: PhantomData }
    }

    /// Replaces the store's job settings for this job.
    pub fn with_config(mut self, config: JobConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Runs on a dedicated pool of `thread_count` workers.
    pub fn with_thread_count(mut self, thread_count: usize) -> Self {
        let config = self.config.unwrap_or_default().with_thread_count(thread_count);
        self.config = Some(config);
        self
    }

    /// Jobs over fewer records run as a single task.
    pub fn with_min_parallel_chunk_length(mut self, length: usize) -> Self {
        let config = self.config.unwrap_or_default().with_min_parallel_chunk_length(length);
        self.config = Some(config);
        self
    }

    fn effective_config(&self, store: &EntityStore) -> JobConfig {
        self.config.unwrap_or(store.config().job)
    }

    /// Task ranges `run_parallel` would use against the current `store`.
    pub fn partition(&mut self, store: &EntityStore) -> StoreResult<Vec<Vec<ChunkRange>>> {
        let config = self.effective_config(store);
        let ranges = self.query.chunk_ranges(store)?;
        let total = ranges.iter().map(|range| range.len).sum();
        Ok(partition_ranges(&ranges, config.task_count(total)))
    }

    /// Runs the action on every chunk on the calling thread.
    ///
    /// ## Errors
    /// [`JobError::TasksFailed`] with a single entry for task `0` if the action
    /// failed or panicked.

    pub fn run(mut self, store: &mut EntityStore) -> StoreResult<()> {
        let ranges = self.query.chunk_ranges(store)?;
        let component_ids = self.query.component_ids().to_vec();
        let (archetypes, nodes) = store.split_for_iteration();
        let carved = carve_segments::<D>(archetypes, &component_ids, &[ranges])?;

        let failures: Vec<TaskFailure> = carved
            .into_iter()
            .enumerate()
            .filter_map(|(task_index, segments)| run_task(&self.action, nodes, task_index, segments))
            .collect();
        finish(failures)
    }

    /// Runs the action with tasks spread over worker threads.
    ///
    /// ## Behavior
    /// - Uses rayon's global pool unless a thread count is configured, in
    ///   which case a dedicated pool of that size runs the job.
    /// - Returns only after every task has completed.
    ///
    /// ## Errors
    /// - [`JobError::TasksFailed`] listing each failed task.
    /// - [`JobError::ThreadPool`] if the dedicated pool cannot be built.

    pub fn run_parallel(mut self, store: &mut EntityStore) -> StoreResult<()> {
        let config = self.effective_config(store);
        let tasks = self.partition(store)?;
        let component_ids = self.query.component_ids().to_vec();
        debug!(tasks = tasks.len(), threads = ?config.thread_count, "running query job");

        let (archetypes, nodes) = store.split_for_iteration();
        let carved = carve_segments::<D>(archetypes, &component_ids, &tasks)?;
        let action = &self.action;

        let execute = move || -> Vec<TaskFailure> {
            carved
                .into_par_iter()
                .enumerate()
                .filter_map(|(task_index, segments)| run_task(action, nodes, task_index, segments))
                .collect()
        };

        let failures = match config.thread_count {
            Some(threads) => rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|error| JobError::ThreadPool(error.to_string()))?
                .install(execute),
            None => execute(),
        };
        finish(failures)
    }
}

fn run_task<'a, D, F, E>(
    action: &F,
    nodes: &'a EntityNodes,
    task_index: usize,
    segments: Vec<SegmentMut<'a, D>>,
) -> Option<TaskFailure>
where
    D: QueryData,
    F: for<'c> Fn(ChunksMut<'c, D>) -> Result<(), E>,
    E: Display,
{
    trace!(task_index, segments = segments.len(), "job task started");
    for segment in segments {
        let chunk = ChunksMut {
            components: segment.slices,
            entities: ChunkEntities::new(segment.archetype, segment.start, task_index, segment.ids, nodes),
        };
        let message = match catch_unwind(AssertUnwindSafe(|| action(chunk))) {
            Ok(Ok(())) => continue,
            Ok(Err(error)) => error.to_string(),
            Err(payload) => panic_message(payload),
        };
        return Some(TaskFailure { task_index, message });
    }
    None
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}

fn finish(mut failures: Vec<TaskFailure>) -> StoreResult<()> {
    if failures.is_empty() {
        return Ok(());
    }
    failures.sort_by_key(|failure| failure.task_index);
    Err(JobError::TasksFailed { failures }.into())
}
