//! An archetype based entity component store.
//!
//! Entities with the same set of components share an `Archetype`, which packs
//! them into fixed-size, column-oriented chunks.

pub use archetype::Archetype;
pub use chunk::{Chunk, ChunkLayout};
pub use command_queue::CommandQueue;
pub use component::{
    Component,
    ComponentTypeID,
};
pub use component_data::{ComponentBundle, ComponentValueRef};
pub use component_set::{ComponentFilter, ComponentSet};
pub use config::EngineConfig;
pub use engine::Engine;
pub use entity::{Entity, EntityId, EntityLocation};
pub use entity_iterator::{EntityIterator, EntityRange};
pub use error::{EcsError, Result};
pub use query::{Fetch, ReadOnlyFetch};
pub use system::{FnSystem, System, SystemToken};

pub use bytemuck;

pub mod component;
pub mod component_data;
pub mod component_set;
pub mod entity;

pub mod archetype;
pub mod chunk;
pub mod config;
pub mod engine;

pub mod command_queue;
pub mod entity_iterator;
pub mod query;
pub mod system;

pub mod error;
