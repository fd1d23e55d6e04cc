#![allow(dead_code)]

use std::sync::Once;

use archetype_store::engine::component::{register_component, register_indexed_component, register_tag};
use archetype_store::engine::index::{EntityIndex, HashedIndex, IndexedComponent, OrderedIndex};
use archetype_store::{Bundle, Entity, EntityStore};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Velocity {
    pub dx: f32,
    pub dy: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Health(pub u32);

/// Indexed integer score, ordered values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Score(pub i32);

impl IndexedComponent for Score {
    type Value = i32;
    type Index = OrderedIndex<i32>;

    fn indexed_value(&self) -> i32 {
        self.0
    }
}

/// Indexed name, hashed values only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Name(pub String);

impl IndexedComponent for Name {
    type Value = String;
    type Index = HashedIndex<String>;

    fn indexed_value(&self) -> String {
        self.0.clone()
    }
}

/// Link to another record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Target(pub Entity);

impl IndexedComponent for Target {
    type Value = Entity;
    type Index = EntityIndex;

    fn indexed_value(&self) -> Entity {
        self.0
    }
}

pub struct Frozen;
pub struct Marked;

static INIT: Once = Once::new();

pub fn init_registry() {
    INIT.call_once(|| {
        register_component::<Position>().unwrap();
        register_component::<Velocity>().unwrap();
        register_component::<Health>().unwrap();
        register_indexed_component::<Score>().unwrap();
        register_indexed_component::<Name>().unwrap();
        register_indexed_component::<Target>().unwrap();
        register_tag::<Frozen>().unwrap();
        register_tag::<Marked>().unwrap();
    });
}

pub fn spawn_scored(store: &mut EntityStore, score: i32) -> Entity {
    store
        .create_entity_with(Bundle::new().with(Score(score)).unwrap())
        .unwrap()
}

pub fn spawn_position(store: &mut EntityStore, x: f32) -> Entity {
    store
        .create_entity_with(Bundle::new().with(Position { x, y: 0.0 }).unwrap())
        .unwrap()
}

/// Builds archetypes matching `(Position,)` with record counts 3, 0, 5, 2 in
/// creation order.
pub fn spawn_counts_3_0_5_2(store: &mut EntityStore) {
    for i in 0..3 {
        spawn_position(store, i as f32);
    }

    let emptied = store
        .create_entity_with(
            Bundle::new()
                .with(Position::default())
                .unwrap()
                .with(Velocity::default())
                .unwrap(),
        )
        .unwrap();
    store.delete_entity(emptied).unwrap();

    for i in 0..5 {
        store
            .create_entity_with(
                Bundle::new()
                    .with(Position { x: i as f32, y: 1.0 })
                    .unwrap()
                    .with(Health(0))
                    .unwrap(),
            )
            .unwrap();
    }

    for i in 0..2 {
        store
            .create_entity_with(
                Bundle::new()
                    .with(Position { x: i as f32, y: 2.0 })
                    .unwrap()
                    .with(Velocity { dx: 1.0, dy: 0.0 })
                    .unwrap()
                    .with(Health(0))
                    .unwrap(),
            )
            .unwrap();
    }
}
