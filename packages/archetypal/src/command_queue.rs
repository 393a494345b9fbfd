//! Deferred structural changes.
//!
//! A `CommandQueue` records changes while the engine is borrowed (for example
//! by a running iterator) so that they can be applied afterwards.

use std::ops::Range;

use crate::component::{Component, ComponentTypeID};
use crate::component_data::ComponentBundle;
use crate::component_set::ComponentSet;
use crate::engine::Engine;
use crate::entity::Entity;
use crate::error::Result;

/// The initial payload capacity of a command queue, in bytes.
pub const DEFAULT_COMMAND_QUEUE_CAPACITY: usize = 4096;

#[derive(Clone, Debug)]
enum Command {
    CreateEntity(ComponentSet),
    CreateEntityFromComponents(ComponentSet, Range<usize>),
    CreateEntityWithData(ComponentSet, Range<usize>),
    DestroyEntity(Range<usize>),
    AddComponent(Range<usize>, ComponentTypeID, Range<usize>),
    RemoveComponent(Range<usize>, ComponentTypeID),
}

/// A list of structural changes to apply to an `Engine` later.
///
/// Commands are replayed in the order they were queued. Their payloads share
/// one byte buffer, which doubles in size whenever it runs out of room.
#[derive(Clone, Debug)]
pub struct CommandQueue {
    data: Vec<u8>,
    commands: Vec<Command>,
}

impl CommandQueue {
    /// Create a new, empty, command queue.
    pub fn new() -> CommandQueue {
        CommandQueue::with_capacity(DEFAULT_COMMAND_QUEUE_CAPACITY)
    }

    /// Create a command queue with room for `capacity` bytes of payload.
    pub fn with_capacity(capacity: usize) -> CommandQueue {
        CommandQueue {
            data: Vec::with_capacity(capacity),
            commands: Vec::new(),
        }
    }

    /// Return the number of queued commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns true if no commands are queued.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Return the number of payload bytes in use.
    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    /// Return the payload capacity in bytes.
    pub fn data_capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Drop every queued command, keeping the allocated payload buffer.
    pub fn clear(&mut self) {
        self.data.clear();
        self.commands.clear();
    }

    fn append(&mut self, bytes: &[u8]) -> Range<usize> {
        let start = self.data.len();
        let needed = start + bytes.len();

        if needed > self.data.capacity() {
            let new_capacity = (self.data.capacity() * 2).max(needed);
            self.data.reserve_exact(new_capacity - start);
        }

        self.data.extend_from_slice(bytes);
        start..needed
    }

    fn append_entity(&mut self, entity: Entity) -> Range<usize> {
        self.append(bytemuck::bytes_of(&entity))
    }

    fn read_entity(&self, range: &Range<usize>) -> Entity {
        bytemuck::pod_read_unaligned(&self.data[range.clone()])
    }

    /// Queue the creation of an entity with default components.
    pub fn create_entity(&mut self, component_set: ComponentSet) {
        self.commands.push(Command::CreateEntity(component_set));
    }

    /// Queue the creation of an entity from a bundle of component values.
    ///
    /// Fails immediately if the bundle repeats a type.
    pub fn create_entity_from_components<B: ComponentBundle>(&mut self, bundle: B) -> Result<()> {
        let mut bytes = Vec::new();
        bundle.write_data(&mut bytes)?;
        let range = self.append(&bytes);
        self.commands.push(Command::CreateEntityFromComponents(bundle.component_set(), range));
        Ok(())
    }

    /// Queue the creation of an entity from packed component bytes.
    ///
    /// The size of `raw` is checked when the command is replayed.
    pub fn create_entity_with_data(&mut self, component_set: ComponentSet, raw: &[u8]) {
        let range = self.append(raw);
        self.commands.push(Command::CreateEntityWithData(component_set, range));
    }

    /// Queue the destruction of an entity.
    pub fn destroy_entity(&mut self, entity: Entity) {
        let range = self.append_entity(entity);
        self.commands.push(Command::DestroyEntity(range));
    }

    /// Queue adding a component to an entity.
    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) {
        self.add_component_raw(entity, T::type_id(), bytemuck::bytes_of(&value));
    }

    /// Queue adding a component from its raw bytes.
    pub fn add_component_raw(&mut self, entity: Entity, component_type: ComponentTypeID, bytes: &[u8]) {
        let entity_range = self.append_entity(entity);
        let value_range = self.append(bytes);
        self.commands.push(Command::AddComponent(entity_range, component_type, value_range));
    }

    /// Queue removing a component from an entity.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) {
        self.remove_component_raw(entity, T::type_id());
    }

    /// Queue removing a component by type.
    pub fn remove_component_raw(&mut self, entity: Entity, component_type: ComponentTypeID) {
        let range = self.append_entity(entity);
        self.commands.push(Command::RemoveComponent(range, component_type));
    }

    /// Apply every queued command to `engine`, in order.
    ///
    /// A failing command does not stop the replay. The first error is
    /// returned once every command has run, and the queue is empty afterwards.
    pub fn execute(&mut self, engine: &mut Engine) -> Result<()> {
        let mut first_error = None;
        let mut failed = 0;

        for command in self.commands.iter() {
            if let Err(err) = self.apply(command, engine) {
                log::warn!("queued command failed: {}", err);
                failed += 1;
                first_error.get_or_insert(err);
            }
        }

        log::trace!("replayed {} commands, {} failed", self.commands.len(), failed);
        self.clear();

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn apply(&self, command: &Command, engine: &mut Engine) -> Result<()> {
        match command {
            Command::CreateEntity(set) => {
                engine.create_entity_with(set);
            }
            Command::CreateEntityFromComponents(set, range)
            | Command::CreateEntityWithData(set, range) => {
                engine.create_entity_with_data(set, &self.data[range.clone()])?;
            }
            Command::DestroyEntity(range) => {
                engine.delete_entity(self.read_entity(range))?;
            }
            Command::AddComponent(entity_range, ty, value_range) => {
                let entity = self.read_entity(entity_range);
                engine.add_component_raw(entity, *ty, &self.data[value_range.clone()])?;
            }
            Command::RemoveComponent(range, ty) => {
                engine.remove_component_raw(self.read_entity(range), *ty)?;
            }
        }

        Ok(())
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        CommandQueue::new()
    }
}

#[cfg(test)]
mod test {
    use bytemuck::{Pod, Zeroable};

    use super::*;
    use crate::component;
    use crate::error::EcsError;

    #[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Health(u32);
    component!(Health);

    #[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Armor(u32);
    component!(Armor);

    #[test]
    fn test_replay_in_order() {
        let mut engine = Engine::new();
        let doomed = engine.create_entity();
        let target = engine.create_entity_from_components((Health(10),)).unwrap();

        let mut queue = CommandQueue::new();
        queue.create_entity(ComponentSet::of::<(Health,)>());
        queue.create_entity_from_components((Armor(3), Health(4))).unwrap();
        queue.destroy_entity(doomed);
        queue.add_component(target, Armor(9));
        queue.remove_component::<Health>(target);
        assert_eq!(queue.len(), 5);

        queue.execute(&mut engine).unwrap();
        assert!(queue.is_empty());
        assert_eq!(queue.data_len(), 0);

        assert!(!engine.is_alive(doomed));
        assert_eq!(engine.entity_count(), 3);
        assert_eq!(engine.get_component::<Armor>(target), Ok(&Armor(9)));
        assert_eq!(engine.try_get_component::<Health>(target), Ok(None));
    }

    #[test]
    fn test_failed_command_does_not_stop_replay() {
        let mut engine = Engine::new();
        let e = engine.create_entity();
        let stale = engine.create_entity();
        engine.delete_entity(stale).unwrap();

        let mut queue = CommandQueue::new();
        queue.destroy_entity(stale);
        queue.create_entity(ComponentSet::empty());
        queue.create_entity_from_components((Health(2),)).unwrap();
        queue.destroy_entity(e);
        queue.destroy_entity(e);
        queue.add_component(e, Armor(1));

        assert_eq!(queue.execute(&mut engine), Err(EcsError::StaleEntity(stale)));
        assert!(queue.is_empty());
        assert_eq!(queue.data_len(), 0);

        assert!(!engine.is_alive(e));
        assert_eq!(engine.entity_count(), 2);
        assert_eq!(engine.iter_read_only::<&Health>().count(), 1);
    }

    #[test]
    fn test_buffer_doubles() {
        let mut queue = CommandQueue::with_capacity(16);
        assert_eq!(queue.data_capacity(), 16);

        queue.create_entity_with_data(ComponentSet::empty(), &[0; 12]);
        assert_eq!(queue.data_capacity(), 16);
        queue.create_entity_with_data(ComponentSet::empty(), &[0; 12]);
        assert!(queue.data_capacity() >= 32);
        assert_eq!(queue.data_len(), 24);

        queue.clear();
        assert!(queue.data_capacity() >= 32);
    }
}
