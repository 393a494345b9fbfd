//! Engine configuration.

use std::mem;

use crate::command_queue::DEFAULT_COMMAND_QUEUE_CAPACITY;
use crate::entity::Entity;
use crate::error::{EcsError, Result};

/// The default size of a chunk, in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 16384;

/// Settings fixed for the lifetime of an `Engine`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// The size of each chunk allocation, in bytes.
    pub chunk_size: usize,
    /// The initial payload size of command queues handed out by the engine.
    pub command_queue_capacity: usize,
}

impl EngineConfig {
    /// Set the chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the initial command queue capacity.
    pub fn with_command_queue_capacity(mut self, capacity: usize) -> Self {
        self.command_queue_capacity = capacity;
        self
    }

    /// Check that a chunk can hold at least one bare entity.
    pub fn validate(&self) -> Result<()> {
        let minimum = mem::size_of::<Entity>();
        if self.chunk_size < minimum {
            return Err(EcsError::InvalidChunkSize {
                size: self.chunk_size,
                minimum,
            });
        }

        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            command_queue_capacity: DEFAULT_COMMAND_QUEUE_CAPACITY,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_validate() {
        let config = EngineConfig::default();
        assert_eq!(config.chunk_size, 16384);
        assert_eq!(config.command_queue_capacity, 4096);
        assert!(config.validate().is_ok());

        let tiny = config.with_chunk_size(8);
        assert_eq!(tiny.validate(), Err(EcsError::InvalidChunkSize { size: 8, minimum: 16 }));
        assert!(config.with_chunk_size(16).validate().is_ok());
    }
}
