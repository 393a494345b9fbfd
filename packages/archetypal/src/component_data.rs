//! Containers for component data.
//!
//! Usually used for creating entities individually, or for queuing component
//! values in a command queue.

use crate::component::{Component, ComponentTypeID};
use crate::component_set::ComponentSet;
use crate::entity::Entity;
use crate::error::{EcsError, Result};

/// A safe reference to a component value.
#[derive(Debug, Clone, Copy)]
pub struct ComponentValueRef<'a> {
    type_id: ComponentTypeID,
    slice: &'a [u8],
}

impl<'a> ComponentValueRef<'a> {
    /// Create a `ComponentValueRef` from a raw byte array.
    ///
    /// Fails if `data` is not exactly the size of one value of the type.
    pub fn from_raw(type_id: ComponentTypeID, data: &'a [u8]) -> Result<ComponentValueRef<'a>> {
        let expected = type_id.size();
        if data.len() != expected {
            return Err(EcsError::DataSizeMismatch {
                expected,
                actual: data.len(),
            });
        }

        Ok(ComponentValueRef {
            type_id,
            slice: data,
        })
    }

    /// Get the type ID of the stored component value reference.
    pub fn type_id(&self) -> ComponentTypeID {
        self.type_id
    }

    /// Return the raw bytes of the component.
    pub fn as_slice(&self) -> &'a [u8] {
        self.slice
    }

    /// Attempt to downcast this value ref back to a reference to the component type.
    ///
    /// Returns `None` for a different type, or for bytes which are not
    /// suitably aligned for `T`.
    pub fn downcast<T: Component>(&self) -> Option<&'a T> {
        if T::type_id() == self.type_id {
            bytemuck::try_from_bytes(self.slice).ok()
        } else {
            None
        }
    }

    /// Read a copy of the value, regardless of alignment.
    pub fn read<T: Component>(&self) -> Option<T> {
        if T::type_id() == self.type_id {
            Some(bytemuck::pod_read_unaligned(self.slice))
        } else {
            None
        }
    }
}

impl<'a, T: Component> From<&'a T> for ComponentValueRef<'a> {
    fn from(v: &'a T) -> Self {
        ComponentValueRef {
            type_id: T::type_id(),
            slice: bytemuck::bytes_of(v),
        }
    }
}

/// Sort component values by type and reject repeated or reserved types.
pub fn sort_component_values(values: &mut [ComponentValueRef<'_>]) -> Result<()> {
    values.sort_by_key(|v| v.type_id());

    if values.iter().any(|v| v.type_id() == Entity::type_id()) {
        return Err(EcsError::ReservedComponent);
    }

    for pair in values.windows(2) {
        if pair[0].type_id() == pair[1].type_id() {
            return Err(EcsError::DuplicateComponent {
                component: pair[0].type_id().name(),
            });
        }
    }

    Ok(())
}

/// A group of component values which make up a new entity.
///
/// Implemented for tuples of up to eight components. The order of the tuple
/// does not matter: values are always laid out in ascending type order.
pub trait ComponentBundle {
    /// Return the set of component types in this bundle.
    fn component_set(&self) -> ComponentSet;

    /// Return the values in this bundle, sorted by type ID.
    ///
    /// Fails if a type appears twice or if `Entity` is named.
    fn values(&self) -> Result<Vec<ComponentValueRef<'_>>>;

    /// Append the packed bytes of the values in this bundle to `out`.
    ///
    /// The layout matches the data columns of an archetype of
    /// `component_set()`.
    fn write_data(&self, out: &mut Vec<u8>) -> Result<()> {
        for value in self.values()? {
            out.extend_from_slice(value.as_slice());
        }
        Ok(())
    }
}

macro_rules! impl_component_bundle {
    ($($name:ident $idx:tt),*) => {
        impl<$($name: Component),*> ComponentBundle for ($($name,)*) {
            fn component_set(&self) -> ComponentSet {
                ComponentSet::new(vec![$($name::type_id()),*])
            }

            fn values(&self) -> Result<Vec<ComponentValueRef<'_>>> {
                let mut values = vec![$(ComponentValueRef::from(&self.$idx)),*];
                sort_component_values(&mut values)?;
                Ok(values)
            }
        }
    };
}

impl_component_bundle!(A 0);
impl_component_bundle!(A 0, B 1);
impl_component_bundle!(A 0, B 1, C 2);
impl_component_bundle!(A 0, B 1, C 2, D 3);
impl_component_bundle!(A 0, B 1, C 2, D 3, E 4);
impl_component_bundle!(A 0, B 1, C 2, D 3, E 4, F 5);
impl_component_bundle!(A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_component_bundle!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);

#[cfg(test)]
mod test {
    use bytemuck::{Pod, Zeroable};

    use super::*;
    use crate::component;

    #[derive(Clone, Copy, Default, Debug, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct A(u8);
    component!(A);

    #[derive(Clone, Copy, Default, Debug, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct B(u8);
    component!(B);

    #[test]
    fn test_component_data() {
        let a = A(23);
        let value_ref = ComponentValueRef::from(&a);
        assert_eq!(value_ref.type_id(), A::type_id());
        assert_eq!(value_ref.as_slice()[0], 23);
        assert_eq!(value_ref.downcast::<A>(), Some(&A(23)));
        assert_eq!(value_ref.downcast::<B>(), None);
        assert_eq!(value_ref.read::<A>(), Some(A(23)));

        assert!(ComponentValueRef::from_raw(A::type_id(), &[1, 2]).is_err());
        assert!(ComponentValueRef::from_raw(A::type_id(), &[1]).is_ok());
    }

    #[test]
    fn test_bundle_order() {
        let ab = (A(51), B(24));
        let ba = (B(24), A(51));
        assert_eq!(ab.component_set(), ba.component_set());

        let values = ba.values().unwrap();
        assert_eq!(values.len(), 2);
        assert!(values[0].type_id() < values[1].type_id());

        let mut ab_bytes = Vec::new();
        let mut ba_bytes = Vec::new();
        ab.write_data(&mut ab_bytes).unwrap();
        ba.write_data(&mut ba_bytes).unwrap();
        assert_eq!(ab_bytes, ba_bytes);
        assert_eq!(ab_bytes.len(), 2);
    }

    #[test]
    fn test_bundle_rejects_duplicates() {
        let aa = (A(1), A(2));
        assert!(matches!(aa.values(), Err(EcsError::DuplicateComponent { .. })));

        let reserved = (Entity::default(), A(1));
        assert_eq!(reserved.values().unwrap_err(), EcsError::ReservedComponent);
    }
}
