#![allow(dead_code)]

use std::sync::Once;

use archetype_store::engine::component::{register_component, register_indexed_component};
use archetype_store::engine::index::{EntityIndex, IndexedComponent, OrderedIndex};
use archetype_store::{Bundle, Entity, EntityStore, StoreResult};

pub const AGENTS_SMALL: usize = 10_000;
pub const AGENTS_MED: usize = 100_000;

#[derive(Clone, Copy)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[derive(Clone, Copy)]
pub struct Wealth {
    pub value: f32,
}

#[derive(Clone, Copy)]
pub struct Productivity {
    pub rate: f32,
}

#[derive(Clone, Copy)]
pub struct Group(pub i32);

impl IndexedComponent for Group {
    type Value = i32;
    type Index = OrderedIndex<i32>;

    fn indexed_value(&self) -> i32 {
        self.0
    }
}

#[derive(Clone, Copy)]
pub struct Employer(pub Entity);

impl IndexedComponent for Employer {
    type Value = Entity;
    type Index = EntityIndex;

    fn indexed_value(&self) -> Entity {
        self.0
    }
}

static INIT: Once = Once::new();

pub fn init_components() {
    INIT.call_once(|| {
        register_component::<Position>().unwrap();
        register_component::<Wealth>().unwrap();
        register_component::<Productivity>().unwrap();
        register_indexed_component::<Group>().unwrap();
        register_indexed_component::<Employer>().unwrap();
    });
}

/// Spreads `agent_count` agents over two archetypes; every tenth agent also
/// carries a `Position`.
pub fn populate(store: &mut EntityStore, agent_count: usize) -> StoreResult<Vec<Entity>> {
    let mut agents = Vec::with_capacity(agent_count);
    for i in 0..agent_count {
        let mut bundle = Bundle::new()
            .with(Wealth { value: 100.0 })?
            .with(Productivity { rate: 1.0 })?
            .with(Group((i % 64) as i32))?;
        if i % 10 == 0 {
            bundle.insert(Position { x: 0.0, y: 0.0 })?;
        }
        agents.push(store.create_entity_with(bundle)?);
    }
    Ok(agents)
}

pub fn make_store(agent_count: usize) -> EntityStore {
    init_components();
    let mut store = EntityStore::new();
    populate(&mut store, agent_count).unwrap();
    store
}
