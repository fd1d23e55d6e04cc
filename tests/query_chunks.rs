mod common;

use std::collections::HashSet;

use archetype_store::engine::component::{component_types, tag_set};
use archetype_store::engine::error::{QueryError, StoreError};
use archetype_store::engine::parallel::partition_ranges;
use archetype_store::{Bundle, EntityStore};
use common::*;

#[test]
fn enumerator_skips_empty_archetypes_in_creation_order() {
    init_registry();
    let mut store = EntityStore::new();
    spawn_counts_3_0_5_2(&mut store);

    let mut query = store.query::<(Position,)>().unwrap();
    assert_eq!(query.archetypes(&store).unwrap().len(), 4);

    let lengths: Vec<usize> = query.chunks(&store).unwrap().map(|chunk| chunk.len()).collect();
    assert_eq!(lengths, vec![3, 5, 2]);
    assert_eq!(query.count(&store).unwrap(), 10);
}

#[test]
fn two_way_partition_covers_every_record_once() {
    init_registry();
    let mut store = EntityStore::new();
    spawn_counts_3_0_5_2(&mut store);

    let mut query = store.query::<(Position,)>().unwrap();
    let ranges = query.chunk_ranges(&store).unwrap();
    let tasks = partition_ranges(&ranges, 2);
    assert_eq!(tasks.len(), 2);

    let mut covered = HashSet::new();
    for task in &tasks {
        let records: usize = task.iter().map(|range| range.len).sum();
        assert_eq!(records, 5);
        for range in task {
            for slot in range.start..range.end() {
                assert!(covered.insert((range.archetype, slot)), "slot covered twice");
            }
        }
    }
    assert_eq!(covered.len(), 10);
}

#[test]
fn chunk_slices_are_aligned_with_ids() {
    init_registry();
    let mut store = EntityStore::new();
    spawn_counts_3_0_5_2(&mut store);

    let mut query = store.query::<(Position, Health)>().unwrap();
    let mut seen = 0;
    for chunk in query.chunks(&store).unwrap() {
        let (positions, healths) = chunk.components;
        assert_eq!(positions.len(), chunk.len());
        assert_eq!(healths.len(), chunk.len());
        for (n, entity) in chunk.entities.iter().enumerate() {
            assert_eq!(store.get_component::<Position>(entity).unwrap(), &positions[n]);
            assert_eq!(chunk.entities.entity(n), Some(entity));
        }
        seen += chunk.len();
    }
    assert_eq!(seen, 7);
}

#[test]
fn enumerator_is_restartable() {
    init_registry();
    let mut store = EntityStore::new();
    spawn_counts_3_0_5_2(&mut store);

    let mut query = store.query::<(Position,)>().unwrap();
    let mut chunks = query.chunks(&store).unwrap();
    assert!(!chunks.is_single_entity());
    assert_eq!(chunks.by_ref().count(), 3);
    assert!(chunks.next().is_none());
    chunks.reset();
    assert_eq!(chunks.map(|chunk| chunk.len()).sum::<usize>(), 10);
}

#[test]
fn enumerator_reports_remaining_chunks() {
    init_registry();
    let mut store = EntityStore::new();
    spawn_counts_3_0_5_2(&mut store);

    let mut query = store.query::<(Position, Health)>().unwrap();
    let mut chunks = query.chunks(&store).unwrap();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks.ranges().len(), 2);

    let first = chunks.next().unwrap();
    assert_eq!(chunks.len(), 1);
    chunks.reset();
    let again = chunks.next().unwrap();
    assert_eq!(again.entities.ids(), first.entities.ids());
    assert_eq!(again.components.0, first.components.0);
}

#[test]
fn component_predicates_filter_archetypes() {
    init_registry();
    let mut store = EntityStore::new();
    spawn_counts_3_0_5_2(&mut store);

    let mut with_health = store
        .query::<(Position,)>()
        .unwrap()
        .all_components(component_types::<(Health,)>().unwrap())
        .unwrap();
    assert_eq!(with_health.count(&store).unwrap(), 7);

    let mut without_velocity = store
        .query::<(Position,)>()
        .unwrap()
        .without_any_components(component_types::<(Velocity,)>().unwrap())
        .unwrap();
    assert_eq!(without_velocity.count(&store).unwrap(), 8);

    let mut any = store
        .query::<(Position,)>()
        .unwrap()
        .any_components(component_types::<(Velocity, Health)>().unwrap())
        .unwrap();
    assert_eq!(any.count(&store).unwrap(), 7);

    let mut not_both = store
        .query::<(Position,)>()
        .unwrap()
        .without_all_components(component_types::<(Velocity, Health)>().unwrap())
        .unwrap();
    assert_eq!(not_both.count(&store).unwrap(), 8);
}

#[test]
fn tag_predicates_filter_archetypes() {
    init_registry();
    let mut store = EntityStore::new();
    let plain = spawn_position(&mut store, 0.0);
    let frozen = spawn_position(&mut store, 1.0);
    let both = spawn_position(&mut store, 2.0);
    assert!(store.add_tag::<Frozen>(frozen).unwrap());
    assert!(!store.add_tag::<Frozen>(frozen).unwrap());
    store.add_tag::<Frozen>(both).unwrap();
    store.add_tag::<Marked>(both).unwrap();
    assert!(store.has_tag::<Marked>(both).unwrap());

    let frozen_tags = tag_set::<(Frozen,)>().unwrap();
    let both_tags = tag_set::<(Frozen, Marked)>().unwrap();

    let mut all = store.query::<(Position,)>().unwrap().all_tags(frozen_tags).unwrap();
    assert_eq!(all.count(&store).unwrap(), 2);

    let mut none = store.query::<(Position,)>().unwrap().without_any_tags(frozen_tags).unwrap();
    let ids: Vec<_> = none.chunks(&store).unwrap().flat_map(|c| c.entities.iter().collect::<Vec<_>>()).collect();
    assert_eq!(ids, vec![plain]);

    let mut not_both = store.query::<(Position,)>().unwrap().without_all_tags(both_tags).unwrap();
    assert_eq!(not_both.count(&store).unwrap(), 2);

    let mut any = store.query::<(Position,)>().unwrap().any_tags(both_tags).unwrap();
    assert_eq!(any.count(&store).unwrap(), 2);

    assert!(store.remove_tag::<Frozen>(frozen).unwrap());
    assert_eq!(all.count(&store).unwrap(), 1);
}

#[test]
fn disabled_records_are_excluded_by_default() {
    init_registry();
    let mut store = EntityStore::new();
    let visible = spawn_position(&mut store, 0.0);
    let hidden = spawn_position(&mut store, 1.0);
    assert!(store.disable(hidden).unwrap());
    assert!(store.is_disabled(hidden).unwrap());

    let mut default = store.query::<(Position,)>().unwrap();
    assert_eq!(default.count(&store).unwrap(), 1);

    let mut everything = store.query::<(Position,)>().unwrap().with_disabled().unwrap();
    assert_eq!(everything.count(&store).unwrap(), 2);

    assert!(store.enable(hidden).unwrap());
    assert!(!store.is_disabled(visible).unwrap());
    assert_eq!(default.count(&store).unwrap(), 2);
}

#[test]
fn frozen_query_rejects_predicates_and_tracks_new_archetypes() {
    init_registry();
    let mut store = EntityStore::new();
    spawn_position(&mut store, 0.0);

    let query = store.query::<(Position,)>().unwrap().freeze_filter();
    assert!(query.is_frozen());
    let error = query.all_tags(tag_set::<(Marked,)>().unwrap()).unwrap_err();
    assert_eq!(error, StoreError::Query(QueryError::Frozen));

    let mut query = store.query::<(Position,)>().unwrap().freeze_filter();
    assert_eq!(query.count(&store).unwrap(), 1);

    store
        .create_entity_with(
            Bundle::new()
                .with(Position::default())
                .unwrap()
                .with(Velocity::default())
                .unwrap(),
        )
        .unwrap();
    assert_eq!(query.archetypes(&store).unwrap().len(), 2);
    assert_eq!(query.count(&store).unwrap(), 2);
}

#[test]
fn query_rejects_duplicates_and_foreign_stores() {
    init_registry();
    let store = EntityStore::new();
    let other = EntityStore::new();

    let error = store.query::<(Position, Position)>().unwrap_err();
    assert!(matches!(error, StoreError::Query(QueryError::DuplicateComponent { component: "Position" })));

    let mut query = store.query::<(Position,)>().unwrap();
    let error = query.count(&other).unwrap_err();
    assert!(matches!(error, StoreError::Query(QueryError::ForeignStore { .. })));
}

#[test]
fn for_each_entity_mutates_fields_in_place() {
    init_registry();
    let mut store = EntityStore::new();
    spawn_counts_3_0_5_2(&mut store);

    let mut query = store.query::<(Position, Velocity)>().unwrap();
    let mut visited = Vec::new();
    query
        .for_each_entity(&mut store, |(position, velocity), entity| {
            position.x += velocity.dx;
            visited.push(entity);
        })
        .unwrap();

    assert_eq!(visited.len(), 2);
    for (i, entity) in visited.into_iter().enumerate() {
        assert!(store.is_alive(entity));
        assert_eq!(store.get_component::<Position>(entity).unwrap().x, i as f32 + 1.0);
    }
}

#[test]
fn value_filter_yields_single_record_chunks() {
    init_registry();
    let mut store = EntityStore::new();
    let mut tens = Vec::new();
    for score in [10, 20, 10, 30, 10] {
        let record = store
            .create_entity_with(
                Bundle::new()
                    .with(Score(score))
                    .unwrap()
                    .with(Position { x: score as f32, y: 0.0 })
                    .unwrap(),
            )
            .unwrap();
        if score == 10 {
            tens.push(record);
        }
    }
    spawn_scored(&mut store, 10);

    let mut query = store.query::<(Position,)>().unwrap().has_value::<Score>(10).unwrap();
    assert!(query.is_value_filtered());

    let mut chunks = query.chunks(&store).unwrap();
    assert!(chunks.is_single_entity());
    let mut seen = Vec::new();
    for chunk in chunks.by_ref() {
        assert_eq!(chunk.len(), 1);
        let (positions,) = chunk.components;
        assert_eq!(positions[0].x, 10.0);
        seen.push(chunk.entities.entity(0).unwrap());
    }
    drop(chunks);
    assert_eq!(seen, tens);

    let mut ranged = store
        .query::<(Score,)>()
        .unwrap()
        .value_in_range::<Score>(15, 30)
        .unwrap();
    assert_eq!(ranged.count(&store).unwrap(), 2);

    let mut doubled = 0;
    let mut query = store.query::<(Position,)>().unwrap().has_value::<Score>(10).unwrap();
    query
        .for_each_entity(&mut store, |(position,), _| {
            position.x *= 2.0;
            doubled += 1;
        })
        .unwrap();
    assert_eq!(doubled, 3);
    for record in tens {
        assert_eq!(store.get_component::<Position>(record).unwrap().x, 20.0);
    }
}

#[test]
fn active_loops_reject_structural_changes() {
    init_registry();
    let mut store = EntityStore::new();
    let record = spawn_position(&mut store, 0.0);

    let guard = store.begin_loop();
    assert_eq!(store.active_loops(), 1);
    assert_eq!(
        store.create_entity().unwrap_err(),
        StoreError::StructuralChangeDuringIteration { active: 1 }
    );
    assert!(matches!(
        store.add_component(record, Velocity::default()),
        Err(StoreError::StructuralChangeDuringIteration { .. })
    ));
    assert!(store.delete_entity(record).is_err());
    assert!(store.add_tag::<Marked>(record).is_err());

    // Value updates are not structural.
    store.set_component(record, Position { x: 5.0, y: 0.0 }).unwrap();

    drop(guard);
    assert_eq!(store.active_loops(), 0);
    store.add_component(record, Velocity::default()).unwrap();
    store.delete_entity(record).unwrap();
}

#[test]
fn change_detecting_enumerator_holds_a_guard() {
    init_registry();
    let mut store = EntityStore::new();
    spawn_position(&mut store, 0.0);

    let mut plain = store.query::<(Position,)>().unwrap();
    let mut detecting = store.query::<(Position,)>().unwrap().detect_structural_changes();

    let chunks = plain.chunks(&store).unwrap();
    assert_eq!(store.active_loops(), 0);
    drop(chunks);

    let chunks = detecting.chunks(&store).unwrap();
    assert_eq!(store.active_loops(), 1);
    assert_eq!(chunks.count(), 1);
    assert_eq!(store.active_loops(), 0);

    store.create_entity().unwrap();
}
