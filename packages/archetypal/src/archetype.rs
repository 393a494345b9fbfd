//! Archetypes are the 'layout' of entities, containing a list of the attached components.

use std::sync::Arc;

use crate::chunk::{Chunk, ChunkLayout};
use crate::component::{Component, ComponentTypeID};
use crate::component_set::ComponentSet;
use crate::entity::Entity;
use crate::error::{EcsError, Result};

/// An archetype stores every entity with exactly one set of component types.
///
/// Entities are packed into fixed-size chunks. Every chunk before the active
/// chunk is full, and chunks after it are empty and kept for reuse.
pub struct Archetype {
    id: usize,
    component_set: ComponentSet,
    layout: Arc<ChunkLayout>,
    chunks: Vec<Chunk>,
    active_chunk: usize,
    entity_count: usize,
}

impl Archetype {
    /// Create a new archetype given the component set.
    ///
    /// The first chunk is allocated immediately.
    pub(crate) fn new(id: usize, component_set: ComponentSet, chunk_size: usize) -> Archetype {
        let layout = Arc::new(ChunkLayout::new(&component_set, chunk_size));
        log::debug!(
            "created archetype {} for {:?} ({} entities per chunk)",
            id, component_set, layout.capacity());
        let chunks = vec![Chunk::new(layout.clone())];

        Archetype {
            id,
            component_set,
            layout,
            chunks,
            active_chunk: 0,
            entity_count: 0,
        }
    }

    /// Return the index of this archetype in its engine.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Return the sorted list of component types in this archetype.
    pub fn component_set(&self) -> &ComponentSet {
        &self.component_set
    }

    /// Return the layout shared by the chunks of this archetype.
    pub fn layout(&self) -> &Arc<ChunkLayout> {
        &self.layout
    }

    /// Returns true if this archetype contains the given component.
    pub fn has_component_type(&self, component_type: &ComponentTypeID) -> bool {
        self.component_set.includes(component_type)
    }

    /// Return the number of live entities.
    pub fn entity_count(&self) -> usize {
        self.entity_count
    }

    /// Return the number of allocated chunks, including pooled empty ones.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Return the index of the chunk new entities are added to.
    pub fn active_chunk_index(&self) -> usize {
        self.active_chunk
    }

    /// Return the allocated chunks.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Return a single chunk.
    pub fn chunk(&self, index: usize) -> &Chunk {
        &self.chunks[index]
    }

    /// Return the chunks which hold entities.
    pub(crate) fn occupied_chunks(&self) -> &[Chunk] {
        &self.chunks[..=self.active_chunk]
    }

    /// Make sure the active chunk has a free slot, returning its index.
    fn reserve_slot(&mut self) -> usize {
        if self.chunks[self.active_chunk].is_full() {
            self.active_chunk += 1;

            if self.active_chunk == self.chunks.len() {
                log::trace!("archetype {} allocating chunk {}", self.id, self.active_chunk);
                self.chunks.push(Chunk::new(self.layout.clone()));
            }
        }

        self.active_chunk
    }

    /// Add an entity with default component values.
    pub(crate) fn create_entity(&mut self, entity: Entity) -> (usize, usize) {
        let chunk = self.reserve_slot();
        let slot = self.chunks[chunk].create_entity(entity);
        self.entity_count += 1;
        (chunk, slot)
    }

    /// Add an entity from packed component bytes in column order.
    pub(crate) fn create_entity_with_data(&mut self, entity: Entity, raw: &[u8]) -> Result<(usize, usize)> {
        let expected = self.layout.data_size();
        if raw.len() != expected {
            return Err(EcsError::DataSizeMismatch {
                expected,
                actual: raw.len(),
            });
        }

        let chunk = self.reserve_slot();
        let slot = self.chunks[chunk].create_entity_with_data(entity, raw)?;
        self.entity_count += 1;
        Ok((chunk, slot))
    }

    /// Remove the entity at `(chunk, slot)`.
    ///
    /// The last entity of the active chunk is moved into the vacated slot.
    /// Returns the handle of the entity that now occupies `(chunk, slot)`, or
    /// the removed entity itself if it was the last one.
    pub(crate) fn destroy_entity(&mut self, chunk: usize, slot: usize) -> Entity {
        assert!(chunk <= self.active_chunk, "chunk {} holds no entities", chunk);
        assert!(slot < self.chunks[chunk].len(), "slot {} is not occupied", slot);

        let active = self.active_chunk;
        let last_slot = self.chunks[active].len() - 1;
        let destroyed = self.chunks[chunk].entity(slot);

        if chunk == active {
            self.chunks[active].move_entity(slot, last_slot);
        } else {
            let (head, tail) = self.chunks.split_at_mut(active);
            head[chunk].copy_entity(slot, &tail[0], last_slot);
        }

        self.chunks[active].remove_last();
        self.entity_count -= 1;

        if self.chunks[active].is_empty() && active > 0 {
            self.active_chunk -= 1;
        }

        if chunk == active && slot == last_slot {
            destroyed
        } else {
            self.chunks[chunk].entity(slot)
        }
    }

    /// Add an entity copied from `from`, which lacks `new_type`.
    ///
    /// The entity is not removed from `from`.
    pub(crate) fn add_entity_add_component(
        &mut self,
        from: &Archetype,
        chunk: usize,
        slot: usize,
        new_type: ComponentTypeID,
        data: Option<&[u8]>,
    ) -> (usize, usize) {
        let dst_chunk = self.reserve_slot();
        let dst_slot = self.chunks[dst_chunk]
            .add_entity_add_component(new_type, &from.chunks[chunk], slot, data);
        self.entity_count += 1;
        (dst_chunk, dst_slot)
    }

    /// Add an entity copied from `from`, dropping `removed_type`.
    ///
    /// The entity is not removed from `from`.
    pub(crate) fn add_entity_remove_component(
        &mut self,
        from: &Archetype,
        chunk: usize,
        slot: usize,
        removed_type: ComponentTypeID,
    ) -> (usize, usize) {
        let dst_chunk = self.reserve_slot();
        let dst_slot = self.chunks[dst_chunk]
            .add_entity_remove_component(removed_type, &from.chunks[chunk], slot);
        self.entity_count += 1;
        (dst_chunk, dst_slot)
    }

    /// Return the handle stored at `(chunk, slot)`.
    pub fn entity(&self, chunk: usize, slot: usize) -> Entity {
        self.chunks[chunk].entity(slot)
    }

    /// Get a component of the entity at `(chunk, slot)`.
    pub fn component<T: Component>(&self, chunk: usize, slot: usize) -> Option<&T> {
        self.chunks.get(chunk).and_then(|c| c.component::<T>(slot))
    }

    /// Get a mutable component of the entity at `(chunk, slot)`.
    pub fn component_mut<T: Component>(&mut self, chunk: usize, slot: usize) -> Option<&mut T> {
        self.chunks.get_mut(chunk).and_then(|c| c.component_mut::<T>(slot))
    }

    /// Get a component by its position across the whole archetype.
    pub fn component_at<T: Component>(&self, index: usize) -> Option<&T> {
        let capacity = self.layout.capacity();
        self.component::<T>(index / capacity, index % capacity)
    }

    /// Get the bytes of a component of the entity at `(chunk, slot)`.
    pub fn component_bytes(&self, component_type: ComponentTypeID, chunk: usize, slot: usize) -> Option<&[u8]> {
        self.layout.column_index(component_type)
            .map(|column| self.column_bytes(column, chunk, slot))
    }

    /// Get the bytes stored in a column at `(chunk, slot)`.
    pub fn column_bytes(&self, column: usize, chunk: usize, slot: usize) -> &[u8] {
        self.chunks[chunk].component_bytes(column, slot)
    }

    /// Deallocate the pooled empty chunks after the active chunk.
    ///
    /// Returns the number of chunks freed.
    pub fn release_unused_chunks(&mut self) -> usize {
        let keep = self.active_chunk + 1;
        let released = self.chunks.len() - keep;
        if released > 0 {
            log::trace!("archetype {} releasing {} chunks", self.id, released);
            self.chunks.truncate(keep);
        }
        released
    }
}

impl std::fmt::Debug for Archetype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archetype")
            .field("id", &self.id)
            .field("components", &self.component_set)
            .field("entities", &self.entity_count)
            .field("chunks", &self.chunks.len())
            .finish()
    }
}
