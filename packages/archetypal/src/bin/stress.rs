use std::time::Instant;

use archetypal::{component, CommandQueue, ComponentFilter, Engine, Entity};
use bytemuck::{Pod, Zeroable};
use rand::Rng;

#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Position(f32, f32);

component!(Position);

#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Velocity(f32, f32);

component!(Velocity);

#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Lifetime(u32);

component!(Lifetime);

fn main() -> archetypal::Result<()> {
    pretty_env_logger::init();

    let mut rng = rand::thread_rng();
    let mut engine = Engine::new();
    let mut live: Vec<Entity> = Vec::new();
    let start = Instant::now();

    for _ in 0..8 {
        for _ in 0..4096 {
            let position = Position(rng.gen_range(-100.0..100.0), rng.gen_range(-100.0..100.0));
            let entity = if rng.gen_bool(0.5) {
                let velocity = Velocity(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0));
                engine.create_entity_from_components((position, velocity))?
            } else {
                engine.create_entity_from_components((position,))?
            };
            live.push(entity);
        }

        for _ in 0..1024 {
            let idx = rng.gen_range(0..live.len());
            let entity = live.swap_remove(idx);
            engine.delete_entity(entity)?;
        }

        for _ in 0..512 {
            let entity = live[rng.gen_range(0..live.len())];
            if engine.has_component::<Lifetime>(entity)? {
                engine.remove_component::<Lifetime>(entity)?;
            } else {
                engine.add_component(entity, Lifetime(rng.gen_range(1..4)))?;
            }
        }
    }

    println!("churn: {} entities in {} archetypes after {:?}",
             engine.entity_count(), engine.archetype_count(), start.elapsed());

    let start = Instant::now();
    for _ in 0..16 {
        engine.iter::<(&mut Position, &Velocity)>().process(8, |(position, velocity): (&mut Position, &Velocity)| {
            position.0 += velocity.0;
            position.1 += velocity.1;
        });

        let filter = ComponentFilter::new();
        engine.process_with_queue::<(Entity, &mut Lifetime), _>(&filter, 8, |_, queue: &mut CommandQueue, (entity, lifetime): (Entity, &mut Lifetime)| {
            lifetime.0 = lifetime.0.saturating_sub(1);
            if lifetime.0 == 0 {
                queue.destroy_entity(entity);
            }
        })?;
    }

    println!("movement: {} entities remain after {:?}", engine.entity_count(), start.elapsed());
    println!("released {} chunks", engine.shrink_to_fit());
    Ok(())
}
