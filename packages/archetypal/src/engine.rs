//! The engine owns every archetype and entity.

use std::any::type_name;
use std::collections::HashMap;
use std::mem;

use crossbeam_queue::SegQueue;

use crate::archetype::Archetype;
use crate::command_queue::CommandQueue;
use crate::component::{Component, ComponentTypeID};
use crate::component_data::ComponentBundle;
use crate::component_set::{ComponentFilter, ComponentSet};
use crate::config::EngineConfig;
use crate::entity::{Entity, EntityId, EntityLocation};
use crate::entity_iterator::EntityIterator;
use crate::error::{EcsError, Result};
use crate::query::{Fetch, ReadOnlyFetch};
use crate::system::{BoxedSystem, System, SystemToken};

/// Select the archetypes matching a filter, in creation order.
fn select_archetypes_mut<'a>(
    archetypes: &'a mut [Archetype],
    filter: &ComponentFilter,
    allow_empty: bool,
) -> Vec<&'a mut Archetype> {
    archetypes.iter_mut()
        .filter(|a| (allow_empty || a.entity_count() > 0) && filter.matches(a.component_set()))
        .collect()
}

/// Borrow one archetype mutably and another immutably.
fn archetype_pair(archetypes: &mut [Archetype], dst: usize, src: usize) -> (&mut Archetype, &Archetype) {
    assert_ne!(dst, src, "an archetype cannot transition into itself");

    if dst < src {
        let (head, tail) = archetypes.split_at_mut(src);
        (&mut head[dst], &tail[0])
    } else {
        let (head, tail) = archetypes.split_at_mut(dst);
        (&mut tail[0], &head[src])
    }
}

/// An entity component store.
///
/// Entities live in exactly one archetype at a time. The engine keeps a flat
/// table of their locations, indexed by `Entity::index`, and only ever stores
/// archetype indices so that growing the archetype list never invalidates a
/// location.
pub struct Engine {
    config: EngineConfig,
    locations: Vec<Option<EntityLocation>>,
    free_indices: Vec<usize>,
    next_entity_id: EntityId,
    archetype_map: HashMap<ComponentSet, usize>,
    archetypes: Vec<Archetype>,
    systems: Vec<(SystemToken, BoxedSystem)>,
    next_system_token: usize,
    queue_pool: SegQueue<CommandQueue>,
}

impl Engine {
    /// Create a new engine with the default settings.
    pub fn new() -> Engine {
        Engine::with_valid_config(EngineConfig::default())
    }

    /// Create a new engine with custom settings.
    pub fn with_config(config: EngineConfig) -> Result<Engine> {
        config.validate()?;
        Ok(Engine::with_valid_config(config))
    }

    fn with_valid_config(config: EngineConfig) -> Engine {
        Engine {
            config,
            locations: Vec::new(),
            free_indices: Vec::new(),
            // Zero is never handed out, so a zeroed handle is always stale.
            next_entity_id: 1,
            archetype_map: HashMap::new(),
            archetypes: Vec::new(),
            systems: Vec::new(),
            next_system_token: 0,
            queue_pool: SegQueue::new(),
        }
    }

    /// Return the settings of this engine.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Find or create the archetype of a component set.
    fn archetype_for(&mut self, component_set: &ComponentSet) -> usize {
        if let Some(index) = self.archetype_map.get(component_set) {
            return *index;
        }

        let index = self.archetypes.len();
        self.archetypes.push(Archetype::new(index, component_set.clone(), self.config.chunk_size));
        self.archetype_map.insert(component_set.clone(), index);
        index
    }

    fn allocate_entity(&mut self) -> Entity {
        let index = match self.free_indices.pop() {
            Some(index) => index,
            None => {
                self.locations.push(None);
                self.locations.len() - 1
            }
        };

        let id = self.next_entity_id;
        self.next_entity_id += 1;
        Entity::new(id, index)
    }

    fn place(&mut self, entity: Entity, archetype: usize, (chunk, slot): (usize, usize)) {
        self.locations[entity.index()] = Some(EntityLocation {
            archetype,
            chunk,
            slot,
            entity_id: entity.id(),
        });
    }

    /// Remove an entity from its archetype, patching the location of the
    /// entity which took its place.
    fn remove_from_archetype(&mut self, location: EntityLocation) {
        let moved = self.archetypes[location.archetype].destroy_entity(location.chunk, location.slot);

        if moved.id() != location.entity_id {
            self.locations[moved.index()] = Some(EntityLocation {
                entity_id: moved.id(),
                ..location
            });
        }
    }

    /// Create an entity with no components besides its handle.
    pub fn create_entity(&mut self) -> Entity {
        self.create_entity_with(&ComponentSet::empty())
    }

    /// Create an entity with default values for every component in a set.
    pub fn create_entity_with(&mut self, component_set: &ComponentSet) -> Entity {
        let archetype = self.archetype_for(component_set);
        let entity = self.allocate_entity();
        let position = self.archetypes[archetype].create_entity(entity);
        self.place(entity, archetype, position);
        entity
    }

    /// Create an entity from packed component bytes in column order.
    pub fn create_entity_with_data(&mut self, component_set: &ComponentSet, raw: &[u8]) -> Result<Entity> {
        let expected: usize = component_set.data_types().map(|ty| ty.size()).sum();
        if raw.len() != expected {
            return Err(EcsError::DataSizeMismatch {
                expected,
                actual: raw.len(),
            });
        }

        let archetype = self.archetype_for(component_set);
        let entity = self.allocate_entity();
        let position = self.archetypes[archetype].create_entity_with_data(entity, raw)?;
        self.place(entity, archetype, position);
        Ok(entity)
    }

    /// Create an entity from a tuple of component values, in any order.
    pub fn create_entity_from_components<B: ComponentBundle>(&mut self, bundle: B) -> Result<Entity> {
        let mut data = Vec::new();
        bundle.write_data(&mut data)?;
        self.create_entity_with_data(&bundle.component_set(), &data)
    }

    /// Destroy an entity.
    ///
    /// The handle, and every copy of it, is stale afterwards.
    pub fn delete_entity(&mut self, entity: Entity) -> Result<()> {
        let location = self.entity_location(entity)?;
        self.remove_from_archetype(location);
        self.locations[entity.index()] = None;
        self.free_indices.push(entity.index());
        Ok(())
    }

    /// Returns true if the handle refers to a live entity.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entity_location(entity).is_ok()
    }

    /// Return where an entity is stored.
    pub fn entity_location(&self, entity: Entity) -> Result<EntityLocation> {
        self.locations.get(entity.index())
            .copied()
            .flatten()
            .filter(|location| location.entity_id == entity.id())
            .ok_or(EcsError::StaleEntity(entity))
    }

    /// Return the component set of an entity.
    pub fn component_set(&self, entity: Entity) -> Result<&ComponentSet> {
        let location = self.entity_location(entity)?;
        Ok(self.archetypes[location.archetype].component_set())
    }

    /// Returns true if an entity has a component.
    pub fn has_component<T: Component>(&self, entity: Entity) -> Result<bool> {
        Ok(self.component_set(entity)?.includes(&T::type_id()))
    }

    /// Add a component to an entity.
    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> Result<()> {
        self.add_component_inner(entity, T::type_id(), Some(bytemuck::bytes_of(&value)))
    }

    /// Add a component with its default value.
    pub fn add_default_component<T: Component>(&mut self, entity: Entity) -> Result<()> {
        self.add_component_inner(entity, T::type_id(), None)
    }

    /// Add a component from its raw bytes.
    pub fn add_component_raw(&mut self, entity: Entity, component_type: ComponentTypeID, bytes: &[u8]) -> Result<()> {
        let expected = component_type.size();
        if bytes.len() != expected {
            return Err(EcsError::DataSizeMismatch {
                expected,
                actual: bytes.len(),
            });
        }

        self.add_component_inner(entity, component_type, Some(bytes))
    }

    fn add_component_inner(&mut self, entity: Entity, component_type: ComponentTypeID, data: Option<&[u8]>) -> Result<()> {
        if component_type == Entity::type_id() {
            return Err(EcsError::ReservedComponent);
        }

        let location = self.entity_location(entity)?;
        let src_set = self.archetypes[location.archetype].component_set();
        if src_set.includes(&component_type) {
            return Err(EcsError::DuplicateComponent {
                component: component_type.name(),
            });
        }

        let dst_set = src_set.with(component_type);
        let dst = self.archetype_for(&dst_set);
        let (dst_archetype, src_archetype) = archetype_pair(&mut self.archetypes, dst, location.archetype);
        let position = dst_archetype.add_entity_add_component(
            src_archetype, location.chunk, location.slot, component_type, data);

        self.remove_from_archetype(location);
        self.place(entity, dst, position);
        Ok(())
    }

    /// Remove a component from an entity.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<()> {
        self.remove_component_raw(entity, T::type_id())
    }

    /// Remove a component by type.
    pub fn remove_component_raw(&mut self, entity: Entity, component_type: ComponentTypeID) -> Result<()> {
        if component_type == Entity::type_id() {
            return Err(EcsError::ReservedComponent);
        }

        let location = self.entity_location(entity)?;
        let src_set = self.archetypes[location.archetype].component_set();
        if !src_set.includes(&component_type) {
            return Err(EcsError::MissingComponent {
                entity,
                component: component_type.name(),
            });
        }

        let dst_set = src_set.without(component_type);
        let dst = self.archetype_for(&dst_set);
        let (dst_archetype, src_archetype) = archetype_pair(&mut self.archetypes, dst, location.archetype);
        let position = dst_archetype.add_entity_remove_component(
            src_archetype, location.chunk, location.slot, component_type);

        self.remove_from_archetype(location);
        self.place(entity, dst, position);
        Ok(())
    }

    /// Get a component of an entity.
    ///
    /// # Panics
    /// If the entity does not have a `T`. Use `try_get_component` when that
    /// is expected.
    pub fn get_component<T: Component>(&self, entity: Entity) -> Result<&T> {
        match self.try_get_component::<T>(entity)? {
            Some(component) => Ok(component),
            None => panic!("entity {:?} has no component {}", entity, type_name::<T>()),
        }
    }

    /// Get a mutable component of an entity.
    ///
    /// # Panics
    /// If the entity does not have a `T`, or if `T` is `Entity`.
    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> Result<&mut T> {
        match self.try_get_component_mut::<T>(entity)? {
            Some(component) => Ok(component),
            None => panic!("entity {:?} has no mutable component {}", entity, type_name::<T>()),
        }
    }

    /// Get a component of an entity, if it has one.
    pub fn try_get_component<T: Component>(&self, entity: Entity) -> Result<Option<&T>> {
        let location = self.entity_location(entity)?;
        Ok(self.archetypes[location.archetype].component::<T>(location.chunk, location.slot))
    }

    /// Get a mutable component of an entity, if it has one.
    pub fn try_get_component_mut<T: Component>(&mut self, entity: Entity) -> Result<Option<&mut T>> {
        let location = self.entity_location(entity)?;
        Ok(self.archetypes[location.archetype].component_mut::<T>(location.chunk, location.slot))
    }

    /// Get the bytes of a component of an entity.
    pub fn get_component_bytes(&self, entity: Entity, component_type: ComponentTypeID) -> Result<&[u8]> {
        let location = self.entity_location(entity)?;
        self.archetypes[location.archetype]
            .component_bytes(component_type, location.chunk, location.slot)
            .ok_or(EcsError::MissingComponent {
                entity,
                component: component_type.name(),
            })
    }

    /// Return the number of live entities.
    pub fn entity_count(&self) -> usize {
        self.archetypes.iter().map(|a| a.entity_count()).sum()
    }

    /// Return the number of archetypes created so far.
    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    /// Return the index of the archetype for a component set, if it exists.
    pub fn archetype_index(&self, component_set: &ComponentSet) -> Option<usize> {
        self.archetype_map.get(component_set).copied()
    }

    /// Return an archetype by index.
    ///
    /// Indices are stable for the lifetime of the engine.
    pub fn get_archetype(&self, index: usize) -> Option<&Archetype> {
        self.archetypes.get(index)
    }

    /// Return every archetype, in creation order.
    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    /// Return the archetypes matching a filter, in creation order.
    ///
    /// Archetypes without entities are skipped unless `allow_empty` is set.
    pub fn get_archetypes(&self, filter: &ComponentFilter, allow_empty: bool) -> Vec<&Archetype> {
        self.archetypes.iter()
            .filter(|a| (allow_empty || a.entity_count() > 0) && filter.matches(a.component_set()))
            .collect()
    }

    /// Return the matching archetypes mutably, in creation order.
    ///
    /// This only grants access to component values. Entities can only be
    /// added, moved or removed through the engine, which keeps the location
    /// table in step:
    ///
    /// ```compile_fail
    /// use archetypal::{ComponentFilter, Engine};
    ///
    /// let mut engine = Engine::new();
    /// engine.create_entity();
    /// let mut archetypes = engine.get_archetypes_mut(&ComponentFilter::new(), false);
    /// archetypes[0].destroy_entity(0, 0);
    /// ```
    pub fn get_archetypes_mut(&mut self, filter: &ComponentFilter, allow_empty: bool) -> Vec<&mut Archetype> {
        select_archetypes_mut(&mut self.archetypes, filter, allow_empty)
    }

    /// Free every pooled chunk and command queue.
    ///
    /// Returns the number of chunks freed.
    pub fn shrink_to_fit(&mut self) -> usize {
        while self.queue_pool.pop().is_some() {}
        self.archetypes.iter_mut().map(|a| a.release_unused_chunks()).sum()
    }

    /// Iterate over every entity with the slots of `Q`.
    pub fn iter<Q: Fetch>(&mut self) -> EntityIterator<'_, Q> {
        self.iter_filtered::<Q>(&ComponentFilter::new())
    }

    /// Iterate over the entities with the slots of `Q` which also match `filter`.
    pub fn iter_filtered<Q: Fetch>(&mut self, filter: &ComponentFilter) -> EntityIterator<'_, Q> {
        let filter = ComponentFilter::for_fetch::<Q>().merge(filter);
        EntityIterator::new(select_archetypes_mut(&mut self.archetypes, &filter, false))
    }

    /// Iterate without exclusive access, for fetches which never write.
    pub fn iter_read_only<Q: ReadOnlyFetch>(&self) -> EntityIterator<'_, Q> {
        self.iter_read_only_filtered::<Q>(&ComponentFilter::new())
    }

    /// Iterate read-only over the entities which also match `filter`.
    pub fn iter_read_only_filtered<Q: ReadOnlyFetch>(&self, filter: &ComponentFilter) -> EntityIterator<'_, Q> {
        let filter = ComponentFilter::for_fetch::<Q>().merge(filter);
        EntityIterator::new_read_only(self.get_archetypes(&filter, false))
    }

    /// Take a command queue from the engine's pool.
    pub fn command_queue(&self) -> CommandQueue {
        self.queue_pool.pop()
            .unwrap_or_else(|| CommandQueue::with_capacity(self.config.command_queue_capacity))
    }

    /// Return a command queue to the engine's pool.
    pub fn recycle_command_queue(&self, mut queue: CommandQueue) {
        queue.clear();
        self.queue_pool.push(queue);
    }

    /// Process the matching entities in up to `n` parallel ranges, deferring
    /// structural changes.
    ///
    /// Each range records into its own command queue. Once every range is
    /// done, every queue is executed in range order. The first error is
    /// returned after all of them have run.
    pub fn process_with_queue<Q, F>(&mut self, filter: &ComponentFilter, n: usize, f: F) -> Result<()>
        where Q: Fetch,
              F: for<'a> Fn(usize, &mut CommandQueue, Q::Item<'a>) + Send + Sync
    {
        let filter = ComponentFilter::for_fetch::<Q>().merge(filter);
        let capacity = self.config.command_queue_capacity;

        let queues = {
            let pool = &self.queue_pool;
            let archetypes = select_archetypes_mut(&mut self.archetypes, &filter, false);
            let mut iter = EntityIterator::<Q>::new(archetypes);
            let make_queue = || pool.pop().unwrap_or_else(|| CommandQueue::with_capacity(capacity));
            iter.process_deferred_with(n, make_queue, f)
        };

        let mut result = Ok(());
        for mut queue in queues {
            let executed = queue.execute(self);
            if result.is_ok() {
                result = executed;
            }
            self.recycle_command_queue(queue);
        }

        result
    }

    /// Register a system, calling its `init` once.
    pub fn add_system<S: System + 'static>(&mut self, mut system: S) -> SystemToken {
        let token = SystemToken(self.next_system_token);
        self.next_system_token += 1;

        system.init(self);
        log::debug!("registered system {} as {:?}", type_name::<S>(), token);
        self.systems.push((token, Box::new(system)));
        token
    }

    /// Return a registered system.
    ///
    /// Returns `None` if the token belongs to a system of another type, or
    /// while the systems are being updated.
    pub fn system<S: System + 'static>(&self, token: SystemToken) -> Option<&S> {
        self.systems.iter()
            .find(|(t, _)| *t == token)
            .and_then(|(_, system)| system.as_any().downcast_ref::<S>())
    }

    /// Return a registered system mutably.
    pub fn system_mut<S: System + 'static>(&mut self, token: SystemToken) -> Option<&mut S> {
        self.systems.iter_mut()
            .find(|(t, _)| *t == token)
            .and_then(|(_, system)| system.as_any_mut().downcast_mut::<S>())
    }

    /// Return the number of registered systems.
    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    /// Update every system once, in registration order.
    ///
    /// Systems added during the update run from the next update onwards.
    pub fn update_systems(&mut self) {
        let mut systems = mem::take(&mut self.systems);

        for (_, system) in systems.iter_mut() {
            system.update(self);
        }

        let added = mem::replace(&mut self.systems, systems);
        self.systems.extend(added);
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("entities", &self.entity_count())
            .field("archetypes", &self.archetypes)
            .field("systems", &self.systems.len())
            .finish()
    }
}
