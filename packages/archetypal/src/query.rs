//! Typed access to the columns of an archetype.
//!
//! A `Fetch` describes one slot of an iterator item: an `Entity` handle, a
//! shared or mutable reference to a component, or an optional component.
//! Tuples of fetches fetch every slot at once.

use bit_vec::BitVec;

use crate::chunk::{ChunkLayout, ChunkPtr};
use crate::component::{Component, ComponentTypeID};
use crate::entity::Entity;

/// The columns a query touches and how.
///
/// Conflicting access within one query panics: a component may be read any
/// number of times, or written exactly once.
#[derive(Debug, Clone, Default)]
pub struct Access {
    required: Vec<ComponentTypeID>,
    optional: Vec<ComponentTypeID>,
    reads: BitVec,
    writes: BitVec,
}

impl Access {
    /// Create an empty access list.
    pub fn new() -> Access {
        Access::default()
    }

    fn grow(&mut self, index: usize) {
        if self.reads.len() <= index {
            let extra = index + 1 - self.reads.len();
            self.reads.grow(extra, false);
            self.writes.grow(extra, false);
        }
    }

    fn mark(&mut self, component_type: ComponentTypeID, mutable: bool) {
        let index = component_type.id();
        self.grow(index);

        let read = self.reads[index];
        let written = self.writes[index];

        if written || (mutable && read) {
            panic!("query borrows {:?} mutably and more than once", component_type);
        }

        if mutable {
            if component_type == Entity::type_id() {
                panic!("the Entity column cannot be borrowed mutably");
            }
            self.writes.set(index, true);
        } else {
            self.reads.set(index, true);
        }
    }

    /// Record a slot which requires `component_type`.
    pub fn add_required(&mut self, component_type: ComponentTypeID, mutable: bool) {
        self.mark(component_type, mutable);
        if !self.required.contains(&component_type) {
            self.required.push(component_type);
        }
    }

    /// Record a slot which reads `component_type` when it is present.
    pub fn add_optional(&mut self, component_type: ComponentTypeID, mutable: bool) {
        self.mark(component_type, mutable);
        if !self.optional.contains(&component_type) {
            self.optional.push(component_type);
        }
    }

    /// The component types every matching archetype must have.
    pub fn required(&self) -> &[ComponentTypeID] {
        &self.required
    }

    /// The component types read when present.
    pub fn optional(&self) -> &[ComponentTypeID] {
        &self.optional
    }

    /// Returns true if `component_type` is read by this query.
    pub fn reads(&self, component_type: ComponentTypeID) -> bool {
        self.reads.get(component_type.id()).unwrap_or(false)
    }

    /// Returns true if `component_type` is written by this query.
    pub fn writes(&self, component_type: ComponentTypeID) -> bool {
        self.writes.get(component_type.id()).unwrap_or(false)
    }
}

/// One slot of an iterator item.
///
/// # Safety
/// `access` must describe every column that `fetch` touches, and `fetch`
/// must only create references which are valid for the prepared layout.
pub unsafe trait Fetch {
    /// The value produced for one entity.
    type Item<'a>;

    /// Column offsets resolved against one archetype.
    type State: Copy + Send + Sync;

    /// Record the columns this fetch touches.
    fn access(access: &mut Access);

    /// Resolve this fetch against a chunk layout.
    ///
    /// Returns the missing component type when the layout cannot satisfy a
    /// required slot.
    fn prepare(layout: &ChunkLayout) -> Result<Self::State, ComponentTypeID>;

    /// Fetch the item of one entity.
    ///
    /// # Safety
    /// `chunk` must be a chunk of the layout `state` was prepared for, `slot`
    /// must be occupied, and no other live reference may alias a mutably
    /// fetched value.
    unsafe fn fetch<'a>(chunk: ChunkPtr, state: &Self::State, slot: usize) -> Self::Item<'a>;
}

/// Marker for fetches which never write.
///
/// # Safety
/// Implementors must not create mutable references in `Fetch::fetch`.
pub unsafe trait ReadOnlyFetch: Fetch {}

fn required_offset<T: Component>(layout: &ChunkLayout) -> Result<usize, ComponentTypeID> {
    layout.column_offset(T::type_id()).ok_or_else(T::type_id)
}

unsafe impl Fetch for Entity {
    type Item<'a> = Entity;
    type State = ();

    fn access(access: &mut Access) {
        access.add_required(Entity::type_id(), false);
    }

    fn prepare(_layout: &ChunkLayout) -> Result<(), ComponentTypeID> {
        Ok(())
    }

    unsafe fn fetch<'a>(chunk: ChunkPtr, _state: &(), slot: usize) -> Self::Item<'a> {
        *chunk.slot::<Entity>(0, slot)
    }
}

unsafe impl ReadOnlyFetch for Entity {}

unsafe impl<'r, T: Component> Fetch for &'r T {
    type Item<'a> = &'a T;
    type State = usize;

    fn access(access: &mut Access) {
        access.add_required(T::type_id(), false);
    }

    fn prepare(layout: &ChunkLayout) -> Result<usize, ComponentTypeID> {
        required_offset::<T>(layout)
    }

    unsafe fn fetch<'a>(chunk: ChunkPtr, offset: &usize, slot: usize) -> &'a T {
        &*chunk.slot::<T>(*offset, slot)
    }
}

unsafe impl<'r, T: Component> ReadOnlyFetch for &'r T {}

unsafe impl<'r, T: Component> Fetch for &'r mut T {
    type Item<'a> = &'a mut T;
    type State = usize;

    fn access(access: &mut Access) {
        access.add_required(T::type_id(), true);
    }

    fn prepare(layout: &ChunkLayout) -> Result<usize, ComponentTypeID> {
        required_offset::<T>(layout)
    }

    unsafe fn fetch<'a>(chunk: ChunkPtr, offset: &usize, slot: usize) -> &'a mut T {
        &mut *chunk.slot::<T>(*offset, slot)
    }
}

unsafe impl<'r, T: Component> Fetch for Option<&'r T> {
    type Item<'a> = Option<&'a T>;
    type State = Option<usize>;

    fn access(access: &mut Access) {
        access.add_optional(T::type_id(), false);
    }

    fn prepare(layout: &ChunkLayout) -> Result<Option<usize>, ComponentTypeID> {
        Ok(layout.column_offset(T::type_id()))
    }

    unsafe fn fetch<'a>(chunk: ChunkPtr, offset: &Option<usize>, slot: usize) -> Option<&'a T> {
        offset.map(|offset| &*chunk.slot::<T>(offset, slot))
    }
}

unsafe impl<'r, T: Component> ReadOnlyFetch for Option<&'r T> {}

unsafe impl<'r, T: Component> Fetch for Option<&'r mut T> {
    type Item<'a> = Option<&'a mut T>;
    type State = Option<usize>;

    fn access(access: &mut Access) {
        access.add_optional(T::type_id(), true);
    }

    fn prepare(layout: &ChunkLayout) -> Result<Option<usize>, ComponentTypeID> {
        Ok(layout.column_offset(T::type_id()))
    }

    unsafe fn fetch<'a>(chunk: ChunkPtr, offset: &Option<usize>, slot: usize) -> Option<&'a mut T> {
        offset.map(|offset| &mut *chunk.slot::<T>(offset, slot))
    }
}

macro_rules! impl_fetch_tuple {
    ($($name:ident $idx:tt),*) => {
        unsafe impl<$($name: Fetch),*> Fetch for ($($name,)*) {
            type Item<'a> = ($($name::Item<'a>,)*);
            type State = ($($name::State,)*);

            fn access(access: &mut Access) {
                $($name::access(access);)*
            }

            fn prepare(layout: &ChunkLayout) -> Result<Self::State, ComponentTypeID> {
                Ok(($($name::prepare(layout)?,)*))
            }

            unsafe fn fetch<'a>(chunk: ChunkPtr, state: &Self::State, slot: usize) -> Self::Item<'a> {
                ($($name::fetch(chunk, &state.$idx, slot),)*)
            }
        }

        unsafe impl<$($name: ReadOnlyFetch),*> ReadOnlyFetch for ($($name,)*) {}
    };
}

impl_fetch_tuple!(A 0);
impl_fetch_tuple!(A 0, B 1);
impl_fetch_tuple!(A 0, B 1, C 2);
impl_fetch_tuple!(A 0, B 1, C 2, D 3);
impl_fetch_tuple!(A 0, B 1, C 2, D 3, E 4);
impl_fetch_tuple!(A 0, B 1, C 2, D 3, E 4, F 5);
impl_fetch_tuple!(A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_fetch_tuple!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);

/// Validate the access of a fetch, panicking on conflicts.
pub fn check_access<Q: Fetch>() -> Access {
    let mut access = Access::new();
    Q::access(&mut access);
    access
}

#[cfg(test)]
mod test {
    use bytemuck::{Pod, Zeroable};

    use super::*;
    use crate::component;
    use crate::component_set::ComponentSet;

    #[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Pos(f32);
    component!(Pos);

    #[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Vel(f32);
    component!(Vel);

    #[test]
    fn test_access() {
        let access = check_access::<(Entity, &mut Pos, &Vel, Option<&Vel>)>();
        assert!(access.writes(Pos::type_id()));
        assert!(access.reads(Vel::type_id()));
        assert!(!access.writes(Vel::type_id()));
        assert!(access.reads(Entity::type_id()));
        assert_eq!(access.required(), &[Entity::type_id(), Pos::type_id(), Vel::type_id()]);
        assert_eq!(access.optional(), &[Vel::type_id()]);
    }

    #[test]
    #[should_panic]
    fn test_double_mutable_borrow_panics() {
        check_access::<(&mut Pos, &mut Pos)>();
    }

    #[test]
    #[should_panic]
    fn test_shared_and_mutable_borrow_panics() {
        check_access::<(&Pos, Option<&mut Pos>)>();
    }

    #[test]
    #[should_panic]
    fn test_mutable_entity_panics() {
        check_access::<&mut Entity>();
    }

    #[test]
    fn test_prepare() {
        let layout = ChunkLayout::new(&ComponentSet::of::<(Pos,)>(), 1024);
        assert!(<(Entity, &Pos)>::prepare(&layout).is_ok());
        assert_eq!(<(&Pos, &Vel)>::prepare(&layout).unwrap_err(), Vel::type_id());

        let (_, optional) = <(&Pos, Option<&Vel>)>::prepare(&layout).unwrap();
        assert_eq!(optional, None);
    }
}
