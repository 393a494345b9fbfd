//! Base definitions for components.
//!
//! All entities in this library are built out of components. There is no intrinsic
//! value to an entity. This module provides means of defining and managing
//! components.
//!
//! Each component type is allocated a unique ID the first time it is used (or
//! explicitly registered). There is a macro (`component`) to help you assign
//! this unique ID.

use std::alloc::Layout;
use std::any::type_name;
use std::cmp::{Ord, Ordering};
use std::fmt::{self, Debug, Formatter};
use std::sync::{Arc, PoisonError, RwLock};

use bytemuck::{Pod, Zeroable};
use once_cell::sync::{Lazy, OnceCell};

use crate::entity::Entity;

/// A component type ID which is unique for a specific component type.
///
/// IDs are handed out in registration order and are never reused for the
/// lifetime of the process. `ComponentTypeID(0)` is always `Entity`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentTypeID(usize);

struct ComponentRegistry {
    component_types: Vec<Arc<ComponentRegistration>>,
}

static COMPONENT_REGISTRY: Lazy<RwLock<ComponentRegistry>> = Lazy::new(|| {
    RwLock::new(ComponentRegistry {
        component_types: vec![
            Arc::new(ComponentRegistration::new::<Entity>(ComponentTypeID(0))),
        ],
    })
});

impl ComponentTypeID {
    /// Construct a new `ComponentTypeID` from the inner value.
    pub(crate) const fn new(inner: usize) -> ComponentTypeID {
        ComponentTypeID(inner)
    }

    /// Register a component type, returning its ID.
    ///
    /// Registration is idempotent: the first call assigns the ID and every
    /// later call returns the same one. Calling this during start-up pins the
    /// ID order instead of leaving it to first use.
    pub fn register<T: Component>() -> ComponentTypeID {
        T::type_id()
    }

    /// Return the ID of a component type.
    pub fn of<T: Component>() -> ComponentTypeID {
        T::type_id()
    }

    /// Allocate a fresh ID and registry entry for `T`.
    fn allocate<T: Component>() -> ComponentTypeID {
        // Build the default image before taking the lock so `T::default()` can
        // never deadlock against the registry.
        let mut registration = ComponentRegistration::new::<T>(ComponentTypeID(0));

        let mut r = COMPONENT_REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
        let id = ComponentTypeID(r.component_types.len());
        registration.type_id = id;
        r.component_types.push(Arc::new(registration));
        log::trace!("registered component {} as #{}", type_name::<T>(), id.0);
        id
    }

    /// Fetch the registration for this `ComponentTypeID` returning None if it is
    /// missing from the registry.
    fn safe_registration(&self) -> Option<Arc<ComponentRegistration>> {
        let r = COMPONENT_REGISTRY.read().unwrap_or_else(PoisonError::into_inner);
        r.component_types.get(self.0).cloned()
    }

    /// Fetch the registration information for a component type.
    ///
    /// # Panics
    /// If the ID was not produced by the registry.
    pub fn registration(&self) -> Arc<ComponentRegistration> {
        match self.safe_registration() {
            Some(registration) => registration,
            None => panic!("component type #{} is not registered", self.0),
        }
    }

    /// Return the inner unique ID.
    pub fn id(&self) -> usize {
        self.0
    }

    /// Fetch the memory layout of this component type.
    pub fn layout(&self) -> Layout {
        self.registration().layout()
    }

    /// Return the size in bytes of one instance of this component type.
    pub fn size(&self) -> usize {
        self.registration().size()
    }

    /// Return a copy of the default value of this component type as bytes.
    pub fn default_image(&self) -> Box<[u8]> {
        self.registration().default_image().into()
    }

    /// Overwrite `dst` with the default value of this component type.
    pub fn initialize_slot(&self, dst: &mut [u8]) {
        self.registration().initialize_slot(dst)
    }

    /// Return the name of this registration.
    pub fn name(&self) -> &'static str {
        self.registration().name()
    }
}

impl Debug for ComponentTypeID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.safe_registration() {
            Some(reg) => write!(f, "{}", reg.name()),
            None => write!(f, "ComponentTypeID(#{} missing)", self.0),
        }
    }
}

/// A struct for lazily assigning unique `ComponentTypeID`s.
pub struct AutoComponentTypeID(OnceCell<ComponentTypeID>);

impl AutoComponentTypeID {
    /// Create a new `AutoComponentTypeID`.
    pub const fn new() -> AutoComponentTypeID {
        AutoComponentTypeID(OnceCell::new())
    }

    /// Get the `ComponentTypeID` this struct wraps.
    pub fn get<T: Component>(&self) -> ComponentTypeID {
        *self.0.get_or_init(ComponentTypeID::allocate::<T>)
    }
}

impl Default for AutoComponentTypeID {
    fn default() -> Self {
        AutoComponentTypeID::new()
    }
}

/// The component trait is implemented on all component types.
///
/// Components are plain old data: `Pod` guarantees every bit pattern is valid
/// and that there are no destructors or interior pointers, so chunks can store
/// them as untyped bytes.
///
/// This trait is unsafe, because implementing it and not returning a unique
/// `type_id` can result in other safe functions on `Chunks` performing illegal
/// casts. Use the `component!` macro instead of implementing it by hand.
pub unsafe trait Component: Pod + Zeroable + Default + Debug + Send + Sync + 'static {
    /// Get the unique type ID of this component.
    fn type_id() -> ComponentTypeID;
}

/// A ComponentRegistration is the dynamic version of a type implementing Component.
#[derive(Clone)]
pub struct ComponentRegistration {
    type_id: ComponentTypeID,
    layout: Layout,
    default_image: Box<[u8]>,
    name: &'static str,
}

impl ComponentRegistration {
    /// Create a ComponentRegistration for a static type.
    pub fn new<T: Pod + Default>(type_id: ComponentTypeID) -> ComponentRegistration {
        let default = T::default();

        ComponentRegistration {
            type_id,
            layout: Layout::new::<T>(),
            default_image: bytemuck::bytes_of(&default).into(),
            name: type_name::<T>(),
        }
    }

    /// Return the unique type ID for this `ComponentRegistration`.
    pub fn type_id(&self) -> ComponentTypeID {
        self.type_id
    }

    /// Return the memory layout of a single instance of this component.
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Return the size of a single instance of this component.
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    /// Return the alignment of this component.
    pub fn align(&self) -> usize {
        self.layout.align()
    }

    /// Get the name of this component type.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The byte image of the default value.
    pub fn default_image(&self) -> &[u8] {
        &self.default_image
    }

    /// Given the storage buffer of a component instance, fill in the default
    /// value.
    pub fn initialize_slot(&self, dst: &mut [u8]) {
        assert_eq!(dst.len(), self.default_image.len(), "slot size does not match {}", self.name);
        dst.copy_from_slice(&self.default_image);
    }
}

impl PartialEq for ComponentRegistration {
    fn eq(&self, other: &ComponentRegistration) -> bool {
        self.type_id.eq(&other.type_id)
    }
}

impl Eq for ComponentRegistration {}

impl PartialOrd for ComponentRegistration {
    fn partial_cmp(&self, other: &ComponentRegistration) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ComponentRegistration {
    fn cmp(&self, other: &ComponentRegistration) -> Ordering {
        self.type_id.cmp(&other.type_id)
    }
}

impl Debug for ComponentRegistration {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "<ComponentRegistration {} #{}>", self.name, self.type_id.id())
    }
}

/// Implement the `Component` trait on a type.
///
/// Component types must implement `Pod`, `Default` and `Debug`.
#[macro_export]
macro_rules! component {
    ($i:ident) => {
        const _: () = {
            static INIT_TYPE: $crate::component::AutoComponentTypeID = $crate::component::AutoComponentTypeID::new();

            unsafe impl $crate::component::Component for $i {
                fn type_id() -> $crate::component::ComponentTypeID {
                    INIT_TYPE.get::<$i>()
                }
            }

            ()
        };
    };
}

#[cfg(test)]
mod test {
    use bytemuck::{Pod, Zeroable};

    use super::*;

    #[test]
    fn test_uniqueness() {
        #[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
        #[repr(C)]
        struct A(u32);
        #[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
        #[repr(C)]
        struct B(u32);

        component!(A);
        component!(B);

        assert_ne!(ComponentTypeID(0), A::type_id());
        assert_ne!(ComponentTypeID(0), B::type_id());
        assert_ne!(A::type_id(), B::type_id());
        assert_eq!(Entity::type_id(), ComponentTypeID(0));
    }

    #[test]
    fn test_register_is_idempotent() {
        #[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
        #[repr(C)]
        struct C(u64);

        component!(C);

        let first = ComponentTypeID::register::<C>();
        let second = ComponentTypeID::register::<C>();
        assert_eq!(first, second);
        assert_eq!(first, C::type_id());
        assert_eq!(first.size(), 8);
        assert!(first.name().ends_with("C"));
    }

    #[test]
    fn test_default() {
        #[derive(Debug, Clone, Copy, Pod, Zeroable)]
        #[repr(C)]
        struct A(u8);

        component!(A);

        impl Default for A {
            fn default() -> A {
                A(42)
            }
        }

        let component_type = ComponentRegistration::new::<A>(ComponentTypeID(12));
        assert_eq!(component_type.layout(), Layout::new::<A>());
        assert_eq!(component_type.default_image(), &[42]);

        let raw = &mut [0];
        component_type.initialize_slot(raw);
        assert_eq!(raw[0], 42);

        let registered = A::type_id();
        assert_eq!(&*registered.default_image(), &[42]);
        let raw = &mut [7];
        registered.initialize_slot(raw);
        assert_eq!(raw[0], 42);
    }
}
