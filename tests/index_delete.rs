mod common;

use archetype_store::engine::error::{EntityError, IndexError, QueryError, StoreError};
use archetype_store::engine::component::register_component;
use archetype_store::engine::index::{IndexedComponent, OrderedIndex};
use archetype_store::{Bundle, EntityStore};
use common::*;

#[test]
fn values_follow_inserts_and_deletes() {
    init_registry();
    let mut store = EntityStore::new();

    let first = spawn_scored(&mut store, 10);
    let second = spawn_scored(&mut store, 10);
    let twenty = spawn_scored(&mut store, 20);

    assert_eq!(store.component_index::<Score>().unwrap().values().to_string(), "{ 10, 20 }");

    store.delete_entity(twenty).unwrap();
    assert_eq!(store.component_index::<Score>().unwrap().values().to_string(), "{ 10 }");

    store.delete_entity(first).unwrap();
    store.delete_entity(second).unwrap();
    let index = store.component_index::<Score>().unwrap();
    assert_eq!(index.values().to_string(), "{ }");
    assert!(index.values().is_empty());
}

#[test]
fn set_component_moves_record_between_buckets() {
    init_registry();
    let mut store = EntityStore::new();
    let a = spawn_scored(&mut store, 10);
    let b = spawn_scored(&mut store, 10);

    store.set_component(a, Score(30)).unwrap();

    let index = store.component_index::<Score>().unwrap();
    assert_eq!(index.entities(&10).as_slice(), &[b.id]);
    assert_eq!(index.entities(&30).as_slice(), &[a.id]);
    assert_eq!(index.values().to_vec(), vec![10, 30]);

    // add_component on a present field is an index-aware update too.
    store.add_component(b, Score(40)).unwrap();
    let index = store.component_index::<Score>().unwrap();
    assert!(!index.has_value(&10));
    assert_eq!(index.values().to_vec(), vec![30, 40]);
}

#[test]
fn remove_component_retracts_index_entry() {
    init_registry();
    let mut store = EntityStore::new();
    let a = store
        .create_entity_with(
            Bundle::new()
                .with(Score(7))
                .unwrap()
                .with(Position::default())
                .unwrap(),
        )
        .unwrap();

    assert!(store.remove_component::<Score>(a).unwrap());
    assert!(!store.remove_component::<Score>(a).unwrap());
    assert!(store.component_index::<Score>().unwrap().values().is_empty());
    assert!(store.is_alive(a));
    assert!(store.has_component::<Position>(a).unwrap());
}

#[test]
fn hashed_values_keep_insertion_order() {
    init_registry();
    let mut store = EntityStore::new();
    for name in ["beta", "alpha", "gamma", "alpha"] {
        store
            .create_entity_with(Bundle::new().with(Name(name.to_string())).unwrap())
            .unwrap();
    }

    let index = store.component_index::<Name>().unwrap();
    assert_eq!(index.values().to_vec(), vec!["beta", "alpha", "gamma"]);
    assert_eq!(index.values().to_string(), "{ beta, alpha, gamma }");
    assert_eq!(index.entities(&"alpha".to_string()).len(), 2);
}

#[test]
fn range_filter_on_hashed_index_is_rejected() {
    init_registry();
    let store = EntityStore::new();
    let error = store
        .query::<(Name,)>()
        .unwrap()
        .value_in_range::<Name>("a".into(), "z".into())
        .unwrap_err();
    assert!(matches!(error, StoreError::Query(QueryError::NotComparable { component: "Name" })));
}

#[test]
fn incoming_links_follow_references() {
    init_registry();
    let mut store = EntityStore::new();
    let a = store.create_entity().unwrap();
    let b = store.create_entity().unwrap();
    let c = store.create_entity_with(Bundle::new().with(Target(a)).unwrap()).unwrap();
    let d = store.create_entity_with(Bundle::new().with(Target(a)).unwrap()).unwrap();

    assert_eq!(store.incoming_links::<Target>(a).unwrap().as_slice(), &[c.id, d.id]);
    assert!(store.incoming_links::<Target>(b).unwrap().is_empty());

    store.set_component(d, Target(b)).unwrap();
    assert_eq!(store.incoming_links::<Target>(a).unwrap().as_slice(), &[c.id]);
    assert_eq!(store.incoming_links::<Target>(b).unwrap().as_slice(), &[d.id]);
    assert_eq!(store.incoming_links::<Target>(b).unwrap().to_string(), format!("{{ {} }}", d.id));
}

#[test]
fn deleting_target_detaches_referencing_records() {
    init_registry();
    let mut store = EntityStore::new();
    let target = spawn_scored(&mut store, 1);
    let other = store.create_entity().unwrap();
    let first = store
        .create_entity_with(
            Bundle::new()
                .with(Target(target))
                .unwrap()
                .with(Health(3))
                .unwrap(),
        )
        .unwrap();
    let second = store.create_entity_with(Bundle::new().with(Target(target)).unwrap()).unwrap();
    let bystander = store.create_entity_with(Bundle::new().with(Target(other)).unwrap()).unwrap();

    store.delete_entity(target).unwrap();

    assert!(!store.is_alive(target));
    assert!(store.is_alive(first));
    assert!(store.is_alive(second));
    assert!(!store.has_component::<Target>(first).unwrap());
    assert!(!store.has_component::<Target>(second).unwrap());
    assert_eq!(store.get_component::<Health>(first).unwrap(), &Health(3));
    assert_eq!(store.get_component::<Target>(bystander).unwrap(), &Target(other));

    let index = store.component_index::<Target>().unwrap();
    assert!(!index.values().contains(&target.id));
    assert_eq!(index.values().to_vec(), vec![other.id]);
    assert!(store.incoming_links::<Target>(target).unwrap().is_empty());
}

#[test]
fn self_reference_deletes_cleanly() {
    init_registry();
    let mut store = EntityStore::new();
    let looped = store.create_entity().unwrap();
    store.add_component(looped, Target(looped)).unwrap();
    assert_eq!(store.incoming_links::<Target>(looped).unwrap().as_slice(), &[looped.id]);

    store.delete_entity(looped).unwrap();

    let index = store.component_index::<Target>().unwrap();
    assert!(index.values().is_empty());
    assert!(index.links_to(looped.id).is_empty());
    assert_eq!(store.entity_count(), 0);
}

#[test]
fn reference_cycle_is_broken_by_delete() {
    init_registry();
    let mut store = EntityStore::new();
    let a = store.create_entity().unwrap();
    let b = store.create_entity().unwrap();
    store.add_component(a, Target(b)).unwrap();
    store.add_component(b, Target(a)).unwrap();

    store.delete_entity(a).unwrap();

    assert!(store.is_alive(b));
    assert!(!store.has_component::<Target>(b).unwrap());
    assert!(store.component_index::<Target>().unwrap().values().is_empty());
}

#[test]
fn mutation_bypassing_index_fails_delete() {
    init_registry();
    let mut store = EntityStore::new();
    let record = spawn_scored(&mut store, 10);

    store.get_component_mut::<Score>(record).unwrap().0 = 99;

    let error = store.delete_entity(record).unwrap_err();
    assert!(error.is_consistency_violation());
    assert_eq!(
        error,
        StoreError::Index(IndexError::ValueNotFound { component: "Score", entity: record.id })
    );
    let message = error.to_string();
    assert!(message.contains("'Score'"), "{message}");
    assert!(message.contains("must not be mutated outside the index-maintenance path"), "{message}");

    // The record survives a rejected delete and can be deleted once repaired.
    assert!(store.is_alive(record));
    store.get_component_mut::<Score>(record).unwrap().0 = 10;
    store.delete_entity(record).unwrap();
    assert!(store.component_index::<Score>().unwrap().values().is_empty());
}

#[test]
fn changed_incoming_link_aborts_delete_before_any_detach() {
    init_registry();
    let mut store = EntityStore::new();
    let target = store.create_entity().unwrap();
    let other = store.create_entity().unwrap();
    let first = store.create_entity_with(Bundle::new().with(Target(target)).unwrap()).unwrap();
    let second = store.create_entity_with(Bundle::new().with(Target(target)).unwrap()).unwrap();

    store.get_component_mut::<Target>(second).unwrap().0 = other;

    let error = store.delete_entity(target).unwrap_err();
    assert_eq!(
        error,
        StoreError::Index(IndexError::ValueNotFound { component: "Target", entity: second.id })
    );

    // Nothing was detached.
    assert!(store.is_alive(target));
    assert_eq!(store.get_component::<Target>(first).unwrap(), &Target(target));
    assert_eq!(store.get_component::<Target>(second).unwrap(), &Target(other));
    assert_eq!(store.incoming_links::<Target>(target).unwrap().as_slice(), &[first.id, second.id]);

    store.get_component_mut::<Target>(second).unwrap().0 = target;
    store.delete_entity(target).unwrap();
    assert!(!store.has_component::<Target>(first).unwrap());
    assert!(!store.has_component::<Target>(second).unwrap());
}

#[test]
fn links_to_dead_records_are_rejected() {
    init_registry();
    let mut store = EntityStore::new();
    let old = store.create_entity().unwrap();
    let live = store.create_entity().unwrap();
    let holder = store.create_entity().unwrap();
    store.delete_entity(old).unwrap();

    let stale = StoreError::Entity(EntityError::Stale { entity: old });
    assert_eq!(store.add_component(holder, Target(old)).unwrap_err(), stale);
    assert!(!store.has_component::<Target>(holder).unwrap());

    let count = store.entity_count();
    assert_eq!(store.create_entity_with(Bundle::new().with(Target(old)).unwrap()).unwrap_err(), stale);
    assert_eq!(store.entity_count(), count);

    store.add_component(holder, Target(live)).unwrap();
    assert_eq!(store.set_component(holder, Target(old)).unwrap_err(), stale);
    assert_eq!(store.add_component(holder, Target(old)).unwrap_err(), stale);
    assert_eq!(store.get_component::<Target>(holder).unwrap(), &Target(live));

    // A recycled id does not inherit links aimed at its previous owner.
    let fresh = store.create_entity().unwrap();
    assert_eq!(fresh.id, old.id);
    assert!(store.incoming_links::<Target>(fresh).unwrap().is_empty());
    store.delete_entity(fresh).unwrap();
    assert_eq!(store.get_component::<Target>(holder).unwrap(), &Target(live));
}

#[test]
fn ordered_values_support_range_scans() {
    init_registry();
    let mut store = EntityStore::new();
    for score in [20, 5, 15, 10, 15] {
        spawn_scored(&mut store, score);
    }

    let index = store.component_index::<Score>().unwrap();
    assert_eq!(index.values_in_range(&8, &15).to_vec(), vec![10, 15]);
    assert_eq!(index.values_in_range(&8, &15).to_string(), "{ 10, 15 }");
    assert_eq!(index.values_in_range(&5, &20).len(), 4);
    assert!(index.values_in_range(&21, &30).is_empty());
    assert!(index.values_in_range(&20, &5).is_empty());
}

#[test]
fn mutation_bypassing_index_fails_update() {
    init_registry();
    let mut store = EntityStore::new();
    let record = spawn_scored(&mut store, 5);
    store.get_component_mut::<Score>(record).unwrap().0 = 6;

    let error = store.set_component(record, Score(7)).unwrap_err();
    assert!(error.is_consistency_violation());
}

#[test]
fn deleted_handles_become_stale() {
    init_registry();
    let mut store = EntityStore::new();
    let old = spawn_scored(&mut store, 1);
    store.delete_entity(old).unwrap();

    assert!(!store.is_alive(old));
    assert_eq!(
        store.get_component::<Score>(old).unwrap_err(),
        StoreError::Entity(EntityError::Stale { entity: old })
    );
    assert_eq!(store.delete_entity(old).unwrap_err(), StoreError::Entity(EntityError::Stale { entity: old }));

    let recycled = store.create_entity().unwrap();
    assert_eq!(recycled.id, old.id);
    assert_eq!(recycled.revision, old.revision + 1);
    assert_eq!(store.entity_by_id(old.id), Some(recycled));
}

#[test]
fn explicit_ids_are_claimed_once() {
    init_registry();
    let mut store = EntityStore::new();
    let claimed = store.create_entity_with_id(42).unwrap();
    assert_eq!(claimed.id, 42);
    assert_eq!(
        store.create_entity_with_id(42).unwrap_err(),
        StoreError::Entity(EntityError::IdInUse { id: 42 })
    );
    assert!(store.create_entity_with_id(0).is_err());
}

#[test]
fn index_is_backfilled_on_first_request() {
    init_registry();
    let mut store = EntityStore::new();
    assert!(store.try_index::<Score>().is_none());
    assert!(store.component_index::<Score>().unwrap().values().is_empty());

    spawn_scored(&mut store, 3);
    spawn_scored(&mut store, 1);
    assert_eq!(store.try_index::<Score>().map(|index| index.values().to_vec()), Some(vec![1, 3]));
}

/// Implements the index trait but is registered as a plain field type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Unindexed(i32);

impl IndexedComponent for Unindexed {
    type Value = i32;
    type Index = OrderedIndex<i32>;

    fn indexed_value(&self) -> i32 {
        self.0
    }
}

#[test]
fn plain_registration_has_no_index() {
    init_registry();
    register_component::<Unindexed>().unwrap();
    let mut store = EntityStore::new();
    store.create_entity_with(Bundle::new().with(Unindexed(1)).unwrap()).unwrap();

    let error = store.query::<(Unindexed,)>().unwrap().has_value::<Unindexed>(1).unwrap_err();
    assert!(matches!(error, StoreError::Query(QueryError::NotIndexed { component: "Unindexed" })));
    assert!(store.component_index::<Unindexed>().is_err());
    assert!(store.try_index::<Unindexed>().is_none());
}
