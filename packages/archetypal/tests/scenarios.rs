use std::collections::HashSet;

use archetypal::{
    component, CommandQueue, Component, ComponentFilter, ComponentSet, EcsError, Engine, EngineConfig, Entity, System,
};
use bytemuck::{Pod, Zeroable};

#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Position {
    x: f32,
    y: f32,
}
component!(Position);

#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Velocity {
    x: f32,
    y: f32,
}
component!(Velocity);

#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Sleeping(u32);
component!(Sleeping);

struct Movement {
    workers: usize,
}

impl System for Movement {
    fn init(&mut self, engine: &mut Engine) {
        for i in 0..10 {
            let id = i as f32;
            let velocity = Velocity { x: id * 10.0, y: -id * 10.0 };
            engine.create_entity_from_components((Position::default(), velocity)).unwrap();
        }
    }

    fn update(&mut self, engine: &mut Engine) {
        engine.iter::<(&mut Position, &Velocity)>().process(self.workers, |(p, v): (&mut Position, &Velocity)| {
            p.x += v.x;
            p.y += v.y;
        });
    }
}

#[test]
fn movement_system() {
    let mut engine = Engine::new();
    engine.add_system(Movement { workers: 4 });
    assert_eq!(engine.entity_count(), 10);

    for _ in 0..100 {
        engine.update_systems();
    }

    let mut iter = engine.iter_read_only::<(&Position, &Velocity)>();
    assert_eq!(iter.count(), 10);
    for (position, velocity) in &mut iter {
        assert_eq!(*position, Position { x: velocity.x * 100.0, y: velocity.y * 100.0 });
    }
}

#[test]
fn deferred_mutation_while_iterating() {
    let mut engine = Engine::new();
    for _ in 0..10 {
        engine.create_entity_from_components((Position::default(),)).unwrap();
    }

    let mut queue = CommandQueue::new();
    let mut destroyed = Vec::new();
    {
        let mut iter = engine.iter_read_only::<(Entity, &Position)>();
        for (entity, _) in &mut iter {
            if entity.id() % 2 == 0 {
                queue.destroy_entity(entity);
                queue.create_entity_from_components((Position { x: 1.0, y: 1.0 },)).unwrap();
                destroyed.push(entity);
            }
        }
        assert_eq!(iter.count(), 10);
    }
    assert_eq!(queue.len(), 10);
    assert_eq!(engine.entity_count(), 10);

    queue.execute(&mut engine).unwrap();
    assert_eq!(engine.entity_count(), 10);
    for entity in destroyed {
        assert!(!engine.is_alive(entity));
    }

    let created = engine.iter::<&Position>().iter().filter(|p| p.x == 1.0).count();
    assert_eq!(created, 5);
}

#[test]
fn slot_accounting_across_chunks() {
    let config = EngineConfig::default().with_chunk_size(10 * 24);
    let mut engine = Engine::with_config(config).unwrap();
    let set = ComponentSet::of::<(Sleeping,)>();

    let mut entities: Vec<Entity> = (0..95).map(|_| engine.create_entity_with(&set)).collect();
    for entity in entities.iter() {
        engine.get_component_mut::<Sleeping>(*entity).unwrap().0 = entity.id() as u32;
    }

    let index = engine.archetype_index(&set).unwrap();
    let archetype = engine.get_archetype(index).unwrap();
    let capacity = archetype.layout().capacity();
    assert_eq!(archetype.chunk_count(), (95 + capacity - 1) / capacity);

    // Remove from the middle of every chunk, then check every survivor.
    let mut removed = HashSet::new();
    for i in (0..95).step_by(7).rev() {
        engine.delete_entity(entities[i]).unwrap();
        removed.insert(i);
    }
    entities = entities.into_iter().enumerate()
        .filter(|(i, _)| !removed.contains(i))
        .map(|(_, e)| e)
        .collect();

    let archetype = engine.get_archetype(index).unwrap();
    let occupied: usize = archetype.chunks().iter().map(|c| c.len()).sum();
    assert_eq!(occupied, entities.len());
    assert_eq!(archetype.entity_count(), entities.len());
    for chunk in &archetype.chunks()[..archetype.active_chunk_index()] {
        assert!(chunk.is_full());
    }

    for entity in entities.iter() {
        let value = engine.get_component::<Sleeping>(*entity).unwrap().0;
        let original = entity.id() as u32;
        assert_eq!(value, original);

        let location = engine.entity_location(*entity).unwrap();
        assert_eq!(archetype.entity(location.chunk, location.slot), *entity);
    }
}

#[test]
fn filter_correctness() {
    let mut engine = Engine::new();
    engine.create_entity_from_components((Position::default(),)).unwrap();
    engine.create_entity_from_components((Position::default(), Velocity::default())).unwrap();
    engine.create_entity_from_components((Position::default(), Velocity::default(), Sleeping(1))).unwrap();
    engine.create_entity_from_components((Velocity::default(),)).unwrap();

    let awake = ComponentFilter::new()
        .require::<Position>()
        .require::<Velocity>()
        .exclude::<Sleeping>();
    let selected = engine.get_archetypes(&awake, false);
    assert_eq!(selected.len(), 1);
    assert!(selected[0].has_component_type(&Velocity::type_id()));
    assert!(!selected[0].has_component_type(&Sleeping::type_id()));

    let mut optional = engine.iter::<(&Position, Option<&Sleeping>)>();
    assert_eq!(optional.count(), 3);
    let sleeping: Vec<bool> = optional.iter().map(|(_, s)| s.is_some()).collect();
    assert_eq!(sleeping.iter().filter(|s| **s).count(), 1);

    // Archetypes without entities only show up when asked for.
    let lonely = engine.create_entity_from_components((Sleeping(0),)).unwrap();
    engine.delete_entity(lonely).unwrap();
    let sleeping_only = ComponentFilter::new().require::<Sleeping>();
    assert_eq!(engine.get_archetypes(&sleeping_only, false).len(), 1);
    assert_eq!(engine.get_archetypes(&sleeping_only, true).len(), 2);
}

#[test]
fn parallel_split_visits_everything_once() {
    let mut engine = Engine::with_config(EngineConfig::default().with_chunk_size(512)).unwrap();
    for i in 0..500 {
        let p = Position { x: i as f32, y: 0.0 };
        if i % 3 == 0 {
            engine.create_entity_from_components((p, Sleeping(0))).unwrap();
        } else {
            engine.create_entity_from_components((p,)).unwrap();
        }
    }

    let mut iter = engine.iter::<(Entity, &Position)>();
    let total = iter.count();
    assert_eq!(total, 500);

    for n in [1, 3, 8, 64] {
        let mut seen = HashSet::new();
        for range in iter.split(n) {
            for (entity, _) in range {
                assert!(seen.insert(entity));
            }
        }
        assert_eq!(seen.len(), total);
    }

    drop(iter);
    engine.iter::<&mut Position>().process(6, |p: &mut Position| p.y += 1.0);
    assert!(engine.iter::<&Position>().iter().all(|p| p.y == 1.0));
}

#[test]
fn process_with_queue_defers_until_join() {
    let mut engine = Engine::new();
    let entities: Vec<Entity> = (0..64)
        .map(|i| engine.create_entity_from_components((Position { x: i as f32, y: 0.0 }, Velocity::default())).unwrap())
        .collect();

    let filter = ComponentFilter::new().require::<Velocity>();
    engine.process_with_queue::<(Entity, &Position), _>(&filter, 4, |range, queue: &mut CommandQueue, (entity, position): (Entity, &Position)| {
        assert!(range < 4);
        if position.x >= 32.0 {
            queue.add_component(entity, Sleeping(range as u32));
        }
    }).unwrap();

    let sleeping = ComponentFilter::new().exclude::<Sleeping>();
    assert_eq!(engine.iter_filtered::<&Velocity>(&sleeping).count(), 32);
    assert_eq!(engine.iter::<&Sleeping>().count(), 32);

    for (i, entity) in entities.iter().enumerate() {
        let location = engine.entity_location(*entity).unwrap();
        assert_eq!(engine.get_archetype(location.archetype).unwrap().entity(location.chunk, location.slot), *entity);
        assert_eq!(engine.get_component::<Position>(*entity).unwrap().x, i as f32);
        assert_eq!(engine.has_component::<Sleeping>(*entity), Ok(i >= 32));
    }

    // A failing queue reports its error once everything has been joined.
    let result = engine.process_with_queue::<Entity, _>(&ComponentFilter::new(), 2, |_, queue: &mut CommandQueue, entity: Entity| {
        queue.destroy_entity(entity);
        queue.destroy_entity(entity);
    });
    assert!(matches!(result, Err(EcsError::StaleEntity(_))));
    assert_eq!(engine.entity_count(), 0);
}

#[test]
fn transitions_patch_locations_across_chunks() {
    // 16 byte handle + 4 byte value, three entities per chunk.
    let config = EngineConfig::default().with_chunk_size(64);
    let mut engine = Engine::with_config(config).unwrap();
    let entities: Vec<Entity> = (0..8u32)
        .map(|i| engine.create_entity_from_components((Sleeping(i),)).unwrap())
        .collect();

    let index = engine.archetype_index(&ComponentSet::of::<(Sleeping,)>()).unwrap();
    assert_eq!(engine.get_archetype(index).unwrap().chunk_count(), 3);

    // The last entity of the last chunk fills the hole in chunk 0.
    engine.add_component(entities[0], Velocity { x: 1.0, y: 0.0 }).unwrap();
    let moved = engine.entity_location(entities[7]).unwrap();
    assert_eq!((moved.archetype, moved.chunk, moved.slot), (index, 0, 0));

    engine.remove_component::<Sleeping>(entities[4]).unwrap();
    engine.add_component(entities[1], Position::default()).unwrap();
    engine.remove_component::<Sleeping>(entities[0]).unwrap();

    for (i, entity) in entities.iter().enumerate() {
        let location = engine.entity_location(*entity).unwrap();
        let archetype = engine.get_archetype(location.archetype).unwrap();
        assert_eq!(archetype.entity(location.chunk, location.slot), *entity);

        match engine.try_get_component::<Sleeping>(*entity).unwrap() {
            Some(sleeping) => assert_eq!(sleeping.0, i as u32),
            None => assert!(i == 0 || i == 4),
        }
    }

    assert_eq!(engine.get_archetype(index).unwrap().entity_count(), 5);
    assert_eq!(engine.get_component::<Velocity>(entities[0]), Ok(&Velocity { x: 1.0, y: 0.0 }));
    assert_eq!(engine.component_set(entities[4]).unwrap(), &ComponentSet::empty());
}
