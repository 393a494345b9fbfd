//! Sets of component types, and filters over them.

use std::slice;

use crate::component::{Component, ComponentTypeID};
use crate::entity::Entity;
use crate::query::{Access, Fetch};

/// A list of component types which ensures a couple of useful invariants:
/// - Component Types are sorted (so `Entity` always comes first)
/// - There are no duplicates
/// - `Entity` is included
///
/// Equality and hashing are structural, so two sets built in a different
/// order compare equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentSet(Vec<ComponentTypeID>);

fn ensure_component_set_valid(component_types: &mut Vec<ComponentTypeID>) {
    let entity_component_type = Entity::type_id();

    if !component_types.contains(&entity_component_type) {
        component_types.push(entity_component_type);
    }
    component_types.sort();
    component_types.dedup();
}

impl ComponentSet {
    /// Create a new `ComponentSet` from a `Vec` of component types.
    pub fn new(mut component_types: Vec<ComponentTypeID>) -> ComponentSet {
        ensure_component_set_valid(&mut component_types);
        ComponentSet(component_types)
    }

    /// The set of an entity with no components besides its handle.
    pub fn empty() -> ComponentSet {
        ComponentSet(vec![Entity::type_id()])
    }

    /// Create the set for a tuple of component types.
    pub fn of<T: ComponentTypes>() -> ComponentSet {
        ComponentSet::new(T::type_ids())
    }

    /// Return the sorted slice of component types in this set.
    pub fn as_slice(&self) -> &[ComponentTypeID] {
        &self.0
    }

    /// Iterate over the component types in this set, in order.
    pub fn iter(&self) -> slice::Iter<'_, ComponentTypeID> {
        self.0.iter()
    }

    /// Iterate over every component type except `Entity`.
    pub fn data_types(&self) -> impl Iterator<Item=ComponentTypeID> + '_ {
        self.0.iter().copied().filter(|ty| *ty != Entity::type_id())
    }

    /// Return the number of component types, including `Entity`.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Return true if this set only holds `Entity`.
    pub fn is_empty(&self) -> bool {
        self.0.len() == 1
    }

    /// Insert a component type into this set.
    ///
    /// Returns false if it was already present.
    pub fn insert(&mut self, component_type: ComponentTypeID) -> bool {
        match self.0.binary_search(&component_type) {
            Ok(_) => false,
            Err(idx) => {
                self.0.insert(idx, component_type);
                true
            }
        }
    }

    /// Remove a component type from this set.
    ///
    /// Returns false if it was missing. `Entity` is never removed.
    pub fn remove(&mut self, component_type: ComponentTypeID) -> bool {
        if component_type == Entity::type_id() {
            return false;
        }

        match self.0.binary_search(&component_type) {
            Ok(idx) => {
                self.0.remove(idx);
                true
            }
            Err(_) => false,
        }
    }

    /// Return a copy of this set with a component type added.
    pub fn with(&self, component_type: ComponentTypeID) -> ComponentSet {
        let mut set = self.clone();
        set.insert(component_type);
        set
    }

    /// Return a copy of this set with a component type removed.
    pub fn without(&self, component_type: ComponentTypeID) -> ComponentSet {
        let mut set = self.clone();
        set.remove(component_type);
        set
    }

    /// Returns true if this `ComponentSet` contains the given component.
    pub fn includes(&self, component_type: &ComponentTypeID) -> bool {
        self.0.binary_search(component_type).is_ok()
    }

    /// Returns true if this `ComponentSet` contains all of the given component types.
    pub fn includes_all<'a>(&self, component_types: impl IntoIterator<Item=&'a ComponentTypeID>) -> bool {
        component_types.into_iter().all(|ct| self.includes(ct))
    }

    /// Returns true if this `ComponentSet` contains any of the given component types.
    pub fn includes_any<'a>(&self, component_types: impl IntoIterator<Item=&'a ComponentTypeID>) -> bool {
        component_types.into_iter().any(|ct| self.includes(ct))
    }

    /// Returns true if every type of `other` is in this set.
    pub fn is_superset(&self, other: &ComponentSet) -> bool {
        self.includes_all(other.iter())
    }
}

impl Default for ComponentSet {
    fn default() -> Self {
        ComponentSet::empty()
    }
}

impl From<Vec<ComponentTypeID>> for ComponentSet {
    fn from(component_types: Vec<ComponentTypeID>) -> Self {
        ComponentSet::new(component_types)
    }
}

impl<'a> IntoIterator for &'a ComponentSet {
    type Item = &'a ComponentTypeID;
    type IntoIter = slice::Iter<'a, ComponentTypeID>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A static list of component types, implemented for tuples of components.
pub trait ComponentTypes {
    /// Return the component types named by this type, in declaration order.
    fn type_ids() -> Vec<ComponentTypeID>;
}

macro_rules! impl_component_types {
    ($($name:ident),*) => {
        impl<$($name: Component),*> ComponentTypes for ($($name,)*) {
            fn type_ids() -> Vec<ComponentTypeID> {
                vec![$($name::type_id()),*]
            }
        }
    };
}

impl_component_types!();
impl_component_types!(A);
impl_component_types!(A, B);
impl_component_types!(A, B, C);
impl_component_types!(A, B, C, D);
impl_component_types!(A, B, C, D, E);
impl_component_types!(A, B, C, D, E, F);
impl_component_types!(A, B, C, D, E, F, G);
impl_component_types!(A, B, C, D, E, F, G, H);

fn sorted_insert(types: &mut Vec<ComponentTypeID>, component_type: ComponentTypeID) {
    if let Err(idx) = types.binary_search(&component_type) {
        types.insert(idx, component_type);
    }
}

/// A read query over archetypes: the types an archetype must have, may have,
/// and must not have.
///
/// Filters only select archetypes; they never define a storage layout.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ComponentFilter {
    required: ComponentSet,
    optional: Vec<ComponentTypeID>,
    excluded: Vec<ComponentTypeID>,
}

impl ComponentFilter {
    /// Create a filter which matches every archetype.
    pub fn new() -> ComponentFilter {
        ComponentFilter::default()
    }

    /// Create the filter implied by the slots of a fetch.
    pub fn for_fetch<Q: Fetch>() -> ComponentFilter {
        let mut access = Access::new();
        Q::access(&mut access);

        let mut filter = ComponentFilter::new();
        for ty in access.required() {
            filter.required.insert(*ty);
        }
        for ty in access.optional() {
            sorted_insert(&mut filter.optional, *ty);
        }
        filter
    }

    /// Require a component type.
    pub fn require<T: Component>(self) -> Self {
        self.require_type(T::type_id())
    }

    /// Require a component type by ID.
    pub fn require_type(mut self, component_type: ComponentTypeID) -> Self {
        self.required.insert(component_type);
        self
    }

    /// Declare a component type which is read when present.
    pub fn optional<T: Component>(self) -> Self {
        self.optional_type(T::type_id())
    }

    /// Declare an optional component type by ID.
    pub fn optional_type(mut self, component_type: ComponentTypeID) -> Self {
        sorted_insert(&mut self.optional, component_type);
        self
    }

    /// Exclude archetypes which have a component type.
    pub fn exclude<T: Component>(self) -> Self {
        self.exclude_type(T::type_id())
    }

    /// Exclude a component type by ID.
    ///
    /// Excluding `Entity` is ignored: every archetype has it.
    pub fn exclude_type(mut self, component_type: ComponentTypeID) -> Self {
        if component_type != Entity::type_id() {
            sorted_insert(&mut self.excluded, component_type);
        }
        self
    }

    /// Combine two filters, taking the union of each list.
    pub fn merge(mut self, other: &ComponentFilter) -> Self {
        for ty in other.required.iter() {
            self.required.insert(*ty);
        }
        for ty in other.optional.iter() {
            sorted_insert(&mut self.optional, *ty);
        }
        for ty in other.excluded.iter() {
            sorted_insert(&mut self.excluded, *ty);
        }
        self
    }

    /// The required component types.
    pub fn required(&self) -> &ComponentSet {
        &self.required
    }

    /// The optional component types.
    pub fn optional_types(&self) -> &[ComponentTypeID] {
        &self.optional
    }

    /// The excluded component types.
    pub fn excluded(&self) -> &[ComponentTypeID] {
        &self.excluded
    }

    /// Returns true if an archetype with this component set is selected.
    pub fn matches(&self, component_set: &ComponentSet) -> bool {
        component_set.is_superset(&self.required)
            && !component_set.includes_any(self.excluded.iter())
    }
}

/// Shortcut for neatly creating component sets.
#[macro_export]
macro_rules! component_set {
    ($($x:expr),* $(,)?) => {
        $crate::component_set::ComponentSet::new(vec![$($x),*])
    };
}

#[cfg(test)]
mod test {
    use bytemuck::{Pod, Zeroable};

    use super::*;
    use crate::component;

    #[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
    #[repr(C)]
    struct A(u32);
    component!(A);

    #[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
    #[repr(C)]
    struct B(u32);
    component!(B);

    #[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
    #[repr(C)]
    struct C(u32);
    component!(C);

    #[test]
    fn test_canonical_order() {
        let ab = component_set![A::type_id(), B::type_id()];
        let ba = component_set![B::type_id(), A::type_id(), B::type_id()];

        assert_eq!(ab, ba);
        assert_eq!(ab.len(), 3);
        assert_eq!(ab.as_slice()[0], Entity::type_id());
        assert_eq!(ab, ComponentSet::of::<(B, A)>());
        assert!(ab.includes(&A::type_id()));
        assert!(!ab.includes(&C::type_id()));

        let mut hasher_ab = std::collections::hash_map::DefaultHasher::new();
        let mut hasher_ba = std::collections::hash_map::DefaultHasher::new();
        std::hash::Hash::hash(&ab, &mut hasher_ab);
        std::hash::Hash::hash(&ba, &mut hasher_ba);
        assert_eq!(std::hash::Hasher::finish(&hasher_ab), std::hash::Hasher::finish(&hasher_ba));
    }

    #[test]
    fn test_insert_remove() {
        let mut set = ComponentSet::empty();
        assert!(set.is_empty());
        assert!(set.insert(A::type_id()));
        assert!(!set.insert(A::type_id()));
        assert!(set.remove(A::type_id()));
        assert!(!set.remove(A::type_id()));
        assert!(!set.remove(Entity::type_id()));
        assert_eq!(set, ComponentSet::empty());

        let with_b = set.with(B::type_id());
        assert_eq!(with_b.without(B::type_id()), set);
        assert_eq!(with_b.data_types().collect::<Vec<_>>(), vec![B::type_id()]);
    }

    #[test]
    fn test_filter_matches() {
        let a = ComponentSet::of::<(A,)>();
        let b = ComponentSet::of::<(B,)>();
        let ab = ComponentSet::of::<(A, B)>();

        let requires_a = ComponentFilter::new().require::<A>();
        assert!(requires_a.matches(&a));
        assert!(!requires_a.matches(&b));
        assert!(requires_a.matches(&ab));

        let a_not_b = ComponentFilter::new().require::<A>().exclude::<B>();
        assert!(a_not_b.matches(&a));
        assert!(!a_not_b.matches(&ab));

        let everything = ComponentFilter::new().exclude_type(Entity::type_id());
        assert!(everything.matches(&b));

        let merged = ComponentFilter::new().require::<B>().merge(&a_not_b);
        assert!(!merged.matches(&ab));
        assert_eq!(merged.required(), &ab);
    }

    #[test]
    fn test_filter_for_fetch() {
        let filter = ComponentFilter::for_fetch::<(Entity, &A, Option<&mut B>)>();
        assert_eq!(filter.required(), &ComponentSet::of::<(A,)>());
        assert_eq!(filter.optional_types(), &[B::type_id()]);
        assert!(filter.excluded().is_empty());
    }
}
