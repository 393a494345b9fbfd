//! Errors returned at the public boundary of the store.

use thiserror::Error;

use crate::entity::Entity;

/// The error type for fallible engine and command queue operations.
///
/// Internal invariant breaches (pushing into a full chunk, removing from an
/// empty one, out-of-range slots) are not represented here: they panic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EcsError {
    /// The handle does not refer to a live entity.
    #[error("entity {0:?} is stale or was never created")]
    StaleEntity(Entity),

    /// The entity does not have the requested component.
    #[error("entity {entity:?} has no component {component}")]
    MissingComponent {
        entity: Entity,
        component: &'static str,
    },

    /// A query slot requires a column the archetype does not have.
    #[error("archetype {archetype} has no column for {component}")]
    MissingColumn {
        archetype: usize,
        component: &'static str,
    },

    /// The component is already present (or named twice in one bundle).
    #[error("component {component} is already present")]
    DuplicateComponent {
        component: &'static str,
    },

    /// The `Entity` column is managed by the engine.
    #[error("the Entity component cannot be added or removed")]
    ReservedComponent,

    /// Raw component data did not match the expected layout.
    #[error("expected {expected} bytes of component data, got {actual}")]
    DataSizeMismatch {
        expected: usize,
        actual: usize,
    },

    /// The configured chunk size cannot hold a single entity.
    #[error("chunk size {size} is smaller than the minimum of {minimum} bytes")]
    InvalidChunkSize {
        size: usize,
        minimum: usize,
    },
}

/// Shorthand for results using `EcsError`.
pub type Result<T, E = EcsError> = std::result::Result<T, E>;
