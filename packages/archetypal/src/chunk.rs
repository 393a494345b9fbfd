//! Logic for dealing with chunks of entities.

use std::alloc::{self, Layout};
use std::fmt::{self, Debug, Formatter};
use std::ptr::{self, NonNull};
use std::sync::Arc;

use crate::component::{Component, ComponentRegistration, ComponentTypeID};
use crate::component_set::ComponentSet;
use crate::entity::Entity;
use crate::error::{EcsError, Result};

/// The placement of one component column inside a chunk.
#[derive(Debug, Clone)]
pub struct ColumnLayout {
    registration: Arc<ComponentRegistration>,
    offset: usize,
}

impl ColumnLayout {
    /// Return the component type stored in this column.
    pub fn type_id(&self) -> ComponentTypeID {
        self.registration.type_id()
    }

    /// Return the size of one value in this column.
    pub fn size(&self) -> usize {
        self.registration.size()
    }

    /// Return the alignment of this column.
    pub fn align(&self) -> usize {
        self.registration.align()
    }

    /// Return the byte offset of the start of this column in a chunk.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Return the registration of the stored component type.
    pub fn registration(&self) -> &ComponentRegistration {
        &self.registration
    }
}

/// The memory layout shared by every chunk of one archetype.
///
/// Columns are stored as a struct of arrays in canonical type order, so
/// column 0 always holds the `Entity` handles.
#[derive(Debug, Clone)]
pub struct ChunkLayout {
    component_set: ComponentSet,
    columns: Vec<ColumnLayout>,
    entity_size: usize,
    capacity: usize,
    memory_layout: Layout,
}

impl ChunkLayout {
    /// Calculate the layout of chunks of `chunk_size` bytes for a component set.
    ///
    /// Each chunk holds `chunk_size / entity_size` entities, reduced until the
    /// aligned columns fit. Entities larger than a chunk still get one slot.
    ///
    /// # Panics
    /// If the resulting block cannot be described by a `Layout`.
    pub fn new(component_set: &ComponentSet, chunk_size: usize) -> ChunkLayout {
        let registrations: Vec<Arc<ComponentRegistration>> = component_set.iter()
            .map(|ty| ty.registration())
            .collect();
        let entity_size: usize = registrations.iter().map(|r| r.size()).sum();

        let mut capacity = (chunk_size / entity_size.max(1)).max(1);
        let (mut offsets, mut total, mut align) = ChunkLayout::calculate_offsets(&registrations, capacity);
        while capacity > 1 && total > chunk_size {
            capacity -= 1;
            let recalculated = ChunkLayout::calculate_offsets(&registrations, capacity);
            offsets = recalculated.0;
            total = recalculated.1;
            align = recalculated.2;
        }

        let memory_layout = match Layout::from_size_align(total, align) {
            Ok(layout) => layout,
            Err(err) => panic!("cannot lay out chunk for {:?}: {}", component_set, err),
        };

        let columns = registrations.into_iter()
            .zip(offsets)
            .map(|(registration, offset)| ColumnLayout { registration, offset })
            .collect();

        ChunkLayout {
            component_set: component_set.clone(),
            columns,
            entity_size,
            capacity,
            memory_layout,
        }
    }

    fn calculate_offsets(registrations: &[Arc<ComponentRegistration>], capacity: usize) -> (Vec<usize>, usize, usize) {
        let mut offset = 0;
        let mut align = 1;
        let mut offsets = Vec::with_capacity(registrations.len());

        for registration in registrations {
            let ty_align = registration.align();
            let misalignment = offset % ty_align;
            if misalignment != 0 {
                offset += ty_align - misalignment;
            }

            if ty_align > align {
                align = ty_align;
            }

            offsets.push(offset);
            offset += capacity * registration.size();
        }

        (offsets, offset, align)
    }

    /// Return the component set this layout was built for.
    pub fn component_set(&self) -> &ComponentSet {
        &self.component_set
    }

    /// Return the columns in canonical order.
    pub fn columns(&self) -> &[ColumnLayout] {
        &self.columns
    }

    /// Return a single column.
    pub fn column(&self, index: usize) -> &ColumnLayout {
        &self.columns[index]
    }

    /// Find the column index holding a component type.
    pub fn column_index(&self, component_type: ComponentTypeID) -> Option<usize> {
        self.columns
            .binary_search_by(|c| c.type_id().cmp(&component_type))
            .ok()
    }

    /// Return the byte offset of the column holding a component type.
    pub fn column_offset(&self, component_type: ComponentTypeID) -> Option<usize> {
        self.column_index(component_type).map(|idx| self.columns[idx].offset)
    }

    /// Return the number of entities each chunk can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Return the total size of one entity row, including its handle.
    pub fn entity_size(&self) -> usize {
        self.entity_size
    }

    /// Return the packed size of one row of component data, excluding the
    /// `Entity` column.
    pub fn data_size(&self) -> usize {
        self.entity_size - self.columns[0].size()
    }

    /// Return the allocation layout of one chunk.
    pub fn memory_layout(&self) -> Layout {
        self.memory_layout
    }
}

/// The base pointer of a chunk, used by queries to address column slots.
#[derive(Clone, Copy)]
pub struct ChunkPtr(NonNull<u8>);

unsafe impl Send for ChunkPtr {}

unsafe impl Sync for ChunkPtr {}

impl ChunkPtr {
    /// Return a pointer to slot `slot` of the column at byte `offset`.
    ///
    /// # Safety
    /// `offset` must be the offset of a column of type `T` in this chunk's
    /// layout, and `slot` must be below its capacity.
    pub unsafe fn slot<T>(self, offset: usize, slot: usize) -> *mut T {
        (self.0.as_ptr().add(offset) as *mut T).add(slot)
    }
}

/// A single `Chunk` of entities of the same `Archetype`.
///
/// The components are stored as a struct of arrays in one contiguous,
/// zero-initialised block of memory. Live entities always occupy slots
/// `0..len()`.
pub struct Chunk {
    layout: Arc<ChunkLayout>,
    ptr: NonNull<u8>,
    len: usize,
}

unsafe impl Send for Chunk {}

unsafe impl Sync for Chunk {}

impl Chunk {
    /// Allocate a new, empty chunk.
    pub fn new(layout: Arc<ChunkLayout>) -> Chunk {
        let memory_layout = layout.memory_layout();
        let raw_ptr = unsafe { alloc::alloc_zeroed(memory_layout) };
        let ptr = match NonNull::new(raw_ptr) {
            Some(ptr) => ptr,
            None => alloc::handle_alloc_error(memory_layout),
        };

        Chunk {
            layout,
            ptr,
            len: 0,
        }
    }

    /// Return the layout of this chunk.
    pub fn layout(&self) -> &Arc<ChunkLayout> {
        &self.layout
    }

    /// Get the total number of entities currently stored in this chunk.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if this chunk contains no entities.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true if no more entities fit in this chunk.
    pub fn is_full(&self) -> bool {
        self.len == self.layout.capacity()
    }

    /// Get the total capacity of this chunk.
    pub fn capacity(&self) -> usize {
        self.layout.capacity()
    }

    pub(crate) fn as_ptr(&self) -> ChunkPtr {
        ChunkPtr(self.ptr)
    }

    fn column_slot_ptr(&self, column: usize, slot: usize) -> *mut u8 {
        let column = &self.layout.columns()[column];
        unsafe { self.ptr.as_ptr().add(column.offset() + column.size() * slot) }
    }

    fn push_slot(&mut self) -> usize {
        assert!(!self.is_full(), "tried to add an entity to a full chunk");
        let slot = self.len;
        self.len += 1;
        slot
    }

    fn write_entity(&mut self, slot: usize, entity: Entity) {
        let dst = self.column_slot_ptr(0, slot);
        let src = bytemuck::bytes_of(&entity);
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len()) };
    }

    /// Append an entity, initialising every data column from its default
    /// value. Returns the new slot.
    pub fn create_entity(&mut self, entity: Entity) -> usize {
        let slot = self.push_slot();
        self.write_entity(slot, entity);

        for column in 1..self.layout.columns().len() {
            let registration = self.layout.columns()[column].registration();
            let dst = self.column_slot_ptr(column, slot);
            let image = registration.default_image();
            unsafe { ptr::copy_nonoverlapping(image.as_ptr(), dst, image.len()) };
        }

        slot
    }

    /// Append an entity, initialising the data columns from packed bytes in
    /// column order. Returns the new slot.
    pub fn create_entity_with_data(&mut self, entity: Entity, raw: &[u8]) -> Result<usize> {
        let expected = self.layout.data_size();
        if raw.len() != expected {
            return Err(EcsError::DataSizeMismatch {
                expected,
                actual: raw.len(),
            });
        }

        let slot = self.push_slot();
        self.write_entity(slot, entity);

        let mut read = 0;
        for column in 1..self.layout.columns().len() {
            let size = self.layout.columns()[column].size();
            let dst = self.column_slot_ptr(column, slot);
            unsafe { ptr::copy_nonoverlapping(raw[read..read + size].as_ptr(), dst, size) };
            read += size;
        }

        Ok(slot)
    }

    /// Return the handle of the entity in a slot.
    pub fn entity(&self, slot: usize) -> Entity {
        self.entities()[slot]
    }

    /// Return the handles of every entity in this chunk.
    pub fn entities(&self) -> &[Entity] {
        let ptr = self.ptr.as_ptr() as *const Entity;
        unsafe { &*ptr::slice_from_raw_parts(ptr, self.len) }
    }

    /// Return the bytes of one component value.
    pub fn component_bytes(&self, column: usize, slot: usize) -> &[u8] {
        assert!(slot < self.len, "slot {} out of range for chunk of {}", slot, self.len);
        let size = self.layout.columns()[column].size();
        let ptr = self.column_slot_ptr(column, slot);
        unsafe { &*ptr::slice_from_raw_parts(ptr, size) }
    }

    /// Return the mutable bytes of one component value.
    ///
    /// Column 0 holds the engine's entity handles and cannot be written.
    pub fn component_bytes_mut(&mut self, column: usize, slot: usize) -> &mut [u8] {
        assert!(column != 0, "the entity column is read-only");
        assert!(slot < self.len, "slot {} out of range for chunk of {}", slot, self.len);
        let size = self.layout.columns()[column].size();
        let ptr = self.column_slot_ptr(column, slot);
        unsafe { &mut *ptr::slice_from_raw_parts_mut(ptr, size) }
    }

    /// Get a reference to a component of an entity.
    pub fn component<T: Component>(&self, slot: usize) -> Option<&T> {
        self.components::<T>().and_then(|c| c.get(slot))
    }

    /// Get a mutable reference to a component of an entity.
    pub fn component_mut<T: Component>(&mut self, slot: usize) -> Option<&mut T> {
        self.components_mut::<T>().and_then(|c| c.get_mut(slot))
    }

    /// Get a slice of components from this chunk.
    pub fn components<T: Component>(&self) -> Option<&[T]> {
        self.layout.column_offset(T::type_id()).map(|offset| {
            unsafe {
                let ptr = self.ptr.as_ptr().add(offset) as *const T;
                &*ptr::slice_from_raw_parts(ptr, self.len)
            }
        })
    }

    /// Get a mutable list of components from this chunk.
    ///
    /// Always `None` for `Entity`.
    pub fn components_mut<T: Component>(&mut self) -> Option<&mut [T]> {
        if T::type_id() == Entity::type_id() {
            return None;
        }

        self.layout.column_offset(T::type_id()).map(|offset| {
            unsafe {
                let ptr = self.ptr.as_ptr().add(offset) as *mut T;
                &mut *ptr::slice_from_raw_parts_mut(ptr, self.len)
            }
        })
    }

    /// Overwrite an occupied slot with an entity from another chunk of the
    /// same layout.
    pub fn copy_entity(&mut self, dst_slot: usize, from: &Chunk, src_slot: usize) {
        assert!(Arc::ptr_eq(&self.layout, &from.layout), "chunks can only share entities with the same layout");
        assert!(dst_slot < self.len, "destination slot {} is not occupied", dst_slot);
        assert!(src_slot < from.len, "source slot {} is not occupied", src_slot);

        for column in 0..self.layout.columns().len() {
            let size = self.layout.columns()[column].size();
            let src = from.column_slot_ptr(column, src_slot);
            let dst = self.column_slot_ptr(column, dst_slot);
            unsafe { ptr::copy_nonoverlapping(src, dst, size) };
        }
    }

    /// Overwrite an occupied slot with another slot of this chunk.
    pub fn move_entity(&mut self, dst_slot: usize, src_slot: usize) {
        assert!(dst_slot < self.len && src_slot < self.len, "slots must be occupied");
        if dst_slot == src_slot {
            return;
        }

        for column in 0..self.layout.columns().len() {
            let size = self.layout.columns()[column].size();
            let src = self.column_slot_ptr(column, src_slot);
            let dst = self.column_slot_ptr(column, dst_slot);
            unsafe { ptr::copy_nonoverlapping(src, dst, size) };
        }
    }

    /// Remove the entity in the last slot, returning its handle.
    pub fn remove_last(&mut self) -> Entity {
        assert!(!self.is_empty(), "tried to remove an entity from an empty chunk");
        let entity = self.entity(self.len - 1);
        self.len -= 1;
        entity
    }

    /// Append an entity from a chunk which lacks exactly `new_type`.
    ///
    /// Every other column is copied from the matching column of `from`. The
    /// new column is written from `data`, or from its default value.
    ///
    /// # Panics
    /// If the layouts do not differ by exactly `new_type`.
    pub fn add_entity_add_component(
        &mut self,
        new_type: ComponentTypeID,
        from: &Chunk,
        from_slot: usize,
        data: Option<&[u8]>,
    ) -> usize {
        assert_eq!(
            from.layout.columns().len() + 1,
            self.layout.columns().len(),
            "source layout must lack exactly one column"
        );
        assert!(from_slot < from.len, "source slot {} is not occupied", from_slot);
        let slot = self.push_slot();

        for column in 0..self.layout.columns().len() {
            let column_layout = &self.layout.columns()[column];
            let ty = column_layout.type_id();
            let size = column_layout.size();
            let dst = self.column_slot_ptr(column, slot);

            let src = if ty == new_type {
                match data {
                    Some(data) => {
                        assert_eq!(data.len(), size, "component data does not match {}", ty.name());
                        data.as_ptr()
                    }
                    None => column_layout.registration().default_image().as_ptr(),
                }
            } else {
                match from.layout.column_index(ty) {
                    Some(src_column) => from.column_slot_ptr(src_column, from_slot) as *const u8,
                    None => panic!("source chunk has no column for {}", ty.name()),
                }
            };

            unsafe { ptr::copy_nonoverlapping(src, dst, size) };
        }

        slot
    }

    /// Append an entity from a chunk which has every column of this one plus
    /// `removed_type`.
    ///
    /// # Panics
    /// If the layouts do not differ by exactly `removed_type`.
    pub fn add_entity_remove_component(
        &mut self,
        removed_type: ComponentTypeID,
        from: &Chunk,
        from_slot: usize,
    ) -> usize {
        assert_eq!(
            from.layout.columns().len(),
            self.layout.columns().len() + 1,
            "source layout must have exactly one extra column"
        );
        assert!(from.layout.column_index(removed_type).is_some(), "source chunk lacks the removed column");
        assert!(from_slot < from.len, "source slot {} is not occupied", from_slot);
        let slot = self.push_slot();

        for column in 0..self.layout.columns().len() {
            let column_layout = &self.layout.columns()[column];
            let ty = column_layout.type_id();
            let src = match from.layout.column_index(ty) {
                Some(src_column) => from.column_slot_ptr(src_column, from_slot),
                None => panic!("source chunk has no column for {}", ty.name()),
            };
            let dst = self.column_slot_ptr(column, slot);
            unsafe { ptr::copy_nonoverlapping(src, dst, column_layout.size()) };
        }

        slot
    }
}

impl Debug for Chunk {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f,
               "Chunk {{ components: {:?}, len: {}, capacity: {} }}",
               self.layout.component_set(),
               self.len,
               self.capacity())
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout.memory_layout()) };
    }
}

#[cfg(test)]
mod test {
    use bytemuck::{Pod, Zeroable};

    use super::*;
    use crate::component;
    use crate::component_data::ComponentBundle;

    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct A(u32);
    component!(A);

    impl Default for A {
        fn default() -> A {
            A(7)
        }
    }

    #[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct B(u8);
    component!(B);

    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Big([u64; 64]);
    component!(Big);

    impl Default for Big {
        fn default() -> Big {
            Big([0; 64])
        }
    }

    fn layout_of(set: ComponentSet, chunk_size: usize) -> Arc<ChunkLayout> {
        Arc::new(ChunkLayout::new(&set, chunk_size))
    }

    #[test]
    fn test_layout() {
        let layout = layout_of(ComponentSet::of::<(A, B)>(), 1024);
        assert_eq!(layout.entity_size(), 16 + 4 + 1);
        assert_eq!(layout.data_size(), 5);
        assert_eq!(layout.capacity(), 1024 / 21);
        assert!(layout.memory_layout().size() <= 1024);
        assert_eq!(layout.column(0).type_id(), Entity::type_id());
        assert_eq!(layout.column_offset(Entity::type_id()), Some(0));

        for column in layout.columns() {
            assert_eq!(column.offset() % column.align(), 0);
        }

        let oversized = layout_of(ComponentSet::of::<(Big,)>(), 64);
        assert_eq!(oversized.capacity(), 1);
    }

    #[test]
    fn test_create_and_remove() {
        let layout = layout_of(ComponentSet::of::<(A, B)>(), 16 * 21);
        let mut chunk = Chunk::new(layout.clone());
        assert!(chunk.is_empty());

        for i in 0..chunk.capacity() {
            let slot = chunk.create_entity(Entity::new(i as u64, i));
            assert_eq!(slot, i);
        }
        assert!(chunk.is_full());
        assert_eq!(chunk.component::<A>(3), Some(&A(7)));
        assert_eq!(chunk.component::<B>(3), Some(&B(0)));

        chunk.component_mut::<A>(0).unwrap().0 = 99;
        chunk.move_entity(0, chunk.len() - 1);
        assert_eq!(chunk.entity(0).id(), (chunk.len() - 1) as u64);
        assert_eq!(chunk.component::<A>(0), Some(&A(7)));

        let removed = chunk.remove_last();
        assert_eq!(removed.id(), chunk.len() as u64);
        assert_eq!(chunk.entities().len(), chunk.capacity() - 1);
    }

    #[test]
    #[should_panic]
    fn test_full_chunk_panics() {
        let layout = layout_of(ComponentSet::of::<(Big,)>(), 64);
        let mut chunk = Chunk::new(layout);
        chunk.create_entity(Entity::new(0, 0));
        chunk.create_entity(Entity::new(1, 1));
    }

    #[test]
    fn test_create_with_data() {
        let layout = layout_of(ComponentSet::of::<(A, B)>(), 1024);
        let mut chunk = Chunk::new(layout);

        let mut raw = Vec::new();
        (B(3), A(11)).write_data(&mut raw).unwrap();

        let slot = chunk.create_entity_with_data(Entity::new(5, 0), &raw).unwrap();
        assert_eq!(chunk.component::<A>(slot), Some(&A(11)));
        assert_eq!(chunk.component::<B>(slot), Some(&B(3)));

        let err = chunk.create_entity_with_data(Entity::new(6, 1), &raw[..2]).unwrap_err();
        assert_eq!(err, EcsError::DataSizeMismatch { expected: 5, actual: 2 });
        assert_eq!(chunk.len(), 1);
    }

    #[test]
    fn test_structural_copies() {
        let a_layout = layout_of(ComponentSet::of::<(A,)>(), 1024);
        let ab_layout = layout_of(ComponentSet::of::<(A, B)>(), 1024);
        let mut a_chunk = Chunk::new(a_layout);
        let mut ab_chunk = Chunk::new(ab_layout);

        let slot = a_chunk.create_entity(Entity::new(1, 0));
        a_chunk.component_mut::<A>(slot).unwrap().0 = 42;

        let added = ab_chunk.add_entity_add_component(B::type_id(), &a_chunk, slot, Some(&[9]));
        assert_eq!(ab_chunk.entity(added).id(), 1);
        assert_eq!(ab_chunk.component::<A>(added), Some(&A(42)));
        assert_eq!(ab_chunk.component::<B>(added), Some(&B(9)));

        let defaulted = ab_chunk.add_entity_add_component(B::type_id(), &a_chunk, slot, None);
        assert_eq!(ab_chunk.component::<B>(defaulted), Some(&B(0)));

        let back = a_chunk.add_entity_remove_component(B::type_id(), &ab_chunk, added);
        assert_eq!(a_chunk.component::<A>(back), Some(&A(42)));
        assert_eq!(a_chunk.entity(back).id(), 1);
    }
}
