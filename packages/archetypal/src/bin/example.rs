use archetypal::{component, ComponentFilter, ComponentSet, Engine, Entity};
use bytemuck::{Pod, Zeroable};

#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Position(f32, f32);

component!(Position);

#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Velocity(f32, f32);

component!(Velocity);

fn main() -> archetypal::Result<()> {
    pretty_env_logger::init();

    let mut engine = Engine::new();

    let moving = engine.create_entity_from_components((Position(0.0, 0.0), Velocity(1.0, 0.5)))?;
    let still = engine.create_entity_with(&ComponentSet::of::<(Position,)>());
    engine.add_component(still, Velocity(0.0, -1.0))?;
    engine.remove_component::<Velocity>(still)?;

    for _ in 0..3 {
        for (position, velocity) in &mut engine.iter::<(&mut Position, &Velocity)>() {
            position.0 += velocity.0;
            position.1 += velocity.1;
        }
    }

    println!("engine: {:?}", engine);
    println!("moving: {:?} at {:?}", moving, engine.get_component::<Position>(moving)?);
    println!("still: {:?} at {:?}", still, engine.get_component::<Position>(still)?);

    let stationary = ComponentFilter::new().require::<Position>().exclude::<Velocity>();
    for (entity, position) in &mut engine.iter_read_only_filtered::<(Entity, &Position)>(&stationary) {
        println!("stationary: {:?} at {:?}", entity, position);
    }

    for component in engine.component_set(moving)?.iter() {
        println!("component: {:?}", component);
    }

    Ok(())
}
