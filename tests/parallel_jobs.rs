mod common;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use archetype_store::engine::chunks::ChunksMut;
use archetype_store::engine::config::{JobConfig, StoreConfig};
use archetype_store::engine::error::{JobError, StoreError};
use archetype_store::engine::parallel::partition_ranges;
use archetype_store::engine::types::ChunkRange;
use archetype_store::EntityStore;
use common::*;

fn health_values(store: &EntityStore) -> Vec<u32> {
    let mut query = store.query::<(Health,)>().unwrap();
    query
        .chunks(store)
        .unwrap()
        .flat_map(|chunk| chunk.components.0.iter().map(|h| h.0).collect::<Vec<_>>())
        .collect()
}

#[test]
fn partition_splits_by_record_count() {
    let ranges = [ChunkRange::new(0, 0, 3), ChunkRange::new(2, 0, 5), ChunkRange::new(3, 0, 2)];

    let tasks = partition_ranges(&ranges, 2);
    assert_eq!(
        tasks,
        vec![
            vec![ChunkRange::new(0, 0, 3), ChunkRange::new(2, 0, 2)],
            vec![ChunkRange::new(2, 2, 3), ChunkRange::new(3, 0, 2)],
        ]
    );

    let tasks = partition_ranges(&ranges, 3);
    let sizes: Vec<usize> = tasks.iter().map(|t| t.iter().map(|r| r.len).sum()).collect();
    assert_eq!(sizes, vec![4, 4, 2]);

    assert_eq!(partition_ranges(&ranges, 64).len(), 10);
    assert!(partition_ranges(&[], 4).is_empty());
    assert_eq!(partition_ranges(&ranges, 0), vec![ranges.to_vec()]);
}

#[test]
fn run_parallel_visits_every_record_once() {
    init_registry();
    let mut store = EntityStore::new();
    spawn_counts_3_0_5_2(&mut store);
    for _ in 0..3 {
        store.create_entity_with(archetype_store::Bundle::new().with(Health(0)).unwrap()).unwrap();
    }

    let mut query = store.query::<(Health,)>().unwrap();
    let chunks_seen = AtomicUsize::new(0);
    query
        .for_each(|chunk: ChunksMut<'_, (Health,)>| {
            chunks_seen.fetch_add(1, Ordering::Relaxed);
            let (healths,) = chunk.components;
            for health in healths.iter_mut() {
                health.0 += 1;
            }
            Ok::<(), String>(())
        })
        .with_thread_count(3)
        .run_parallel(&mut store)
        .unwrap();

    let values = health_values(&store);
    assert_eq!(values.len(), 10);
    assert!(values.iter().all(|&v| v == 1), "{values:?}");
    assert!(chunks_seen.load(Ordering::Relaxed) >= 3);
}

#[test]
fn tasks_receive_their_index() {
    init_registry();
    let mut store = EntityStore::new();
    spawn_counts_3_0_5_2(&mut store);

    let mut query = store.query::<(Position,)>().unwrap();
    let indices = Mutex::new(BTreeSet::new());
    let mut job = query
        .for_each(|chunk: ChunksMut<'_, (Position,)>| {
            indices.lock().unwrap().insert(chunk.entities.task_index());
            Ok::<(), String>(())
        })
        .with_config(JobConfig::default().with_thread_count(2));

    assert_eq!(job.partition(&store).unwrap().len(), 2);
    job.run_parallel(&mut store).unwrap();
    assert_eq!(indices.into_inner().unwrap(), BTreeSet::from([0, 1]));
}

#[test]
fn small_jobs_run_as_one_task() {
    init_registry();
    let mut store = EntityStore::with_config(
        StoreConfig::default().with_job(JobConfig::default().with_min_parallel_chunk_length(100)),
    );
    spawn_counts_3_0_5_2(&mut store);

    let mut query = store.query::<(Position,)>().unwrap();
    let mut job = query.for_each(|_chunk: ChunksMut<'_, (Position,)>| Ok::<(), String>(()));
    let tasks = job.partition(&store).unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].iter().map(|r| r.len).sum::<usize>(), 10);
}

#[test]
fn failures_are_collected_after_all_tasks_complete() {
    init_registry();
    let mut store = EntityStore::new();
    spawn_counts_3_0_5_2(&mut store);

    let mut query = store.query::<(Health,)>().unwrap();
    let error = query
        .for_each(|chunk: ChunksMut<'_, (Health,)>| {
            if chunk.entities.task_index() == 1 {
                return Err(format!("bad chunk at slot {}", chunk.entities.start()));
            }
            let (healths,) = chunk.components;
            for health in healths.iter_mut() {
                health.0 = 7;
            }
            Ok(())
        })
        .with_thread_count(2)
        .run_parallel(&mut store)
        .unwrap_err();

    let failures = match error {
        StoreError::Job(JobError::TasksFailed { failures }) => failures,
        other => panic!("unexpected error: {other}"),
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].task_index, 1);
    assert!(failures[0].message.starts_with("bad chunk"));

    // Task 0 ran to completion.
    let values = health_values(&store);
    assert_eq!(values.iter().filter(|&&v| v == 7).count(), 4);
}

#[test]
fn panics_are_reported_as_task_failures() {
    init_registry();
    let mut store = EntityStore::new();
    spawn_counts_3_0_5_2(&mut store);

    let mut query = store.query::<(Position,)>().unwrap();
    let error = query
        .for_each(|chunk: ChunksMut<'_, (Position,)>| {
            if chunk.entities.task_index() == 0 {
                panic!("task zero exploded");
            }
            Ok::<(), String>(())
        })
        .with_thread_count(2)
        .run_parallel(&mut store)
        .unwrap_err();

    match error {
        StoreError::Job(JobError::TasksFailed { failures }) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].task_index, 0);
            assert_eq!(failures[0].message, "task zero exploded");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn run_uses_a_single_task_on_the_caller_thread() {
    init_registry();
    let mut store = EntityStore::new();
    spawn_counts_3_0_5_2(&mut store);

    let mut query = store.query::<(Position, Velocity)>().unwrap();
    let caller = std::thread::current().id();
    query
        .for_each(|chunk: ChunksMut<'_, (Position, Velocity)>| {
            assert_eq!(std::thread::current().id(), caller);
            assert_eq!(chunk.entities.task_index(), 0);
            let (positions, velocities) = chunk.components;
            for (position, velocity) in positions.iter_mut().zip(velocities.iter()) {
                position.y += velocity.dx;
            }
            Ok::<(), String>(())
        })
        .run(&mut store)
        .unwrap();

    let mut query = store.query::<(Position, Velocity)>().unwrap();
    let ys: Vec<f32> = query
        .chunks(&store)
        .unwrap()
        .flat_map(|chunk| chunk.components.0.iter().map(|p| p.y).collect::<Vec<_>>())
        .collect();
    assert_eq!(ys, vec![3.0, 3.0]);
}
