//! Systems run against an engine once per update.

use std::any::Any;

use crate::engine::Engine;

/// A unit of behaviour which runs against the engine.
pub trait System: Send {
    /// Called once, when the system is added to an engine.
    fn init(&mut self, _engine: &mut Engine) {}

    /// Update the system.
    fn update(&mut self, engine: &mut Engine);
}

/// A token which represents a system registered with an `Engine`.
///
/// Tokens are not reused within one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SystemToken(pub usize);

/// A system which can be downcast back to its concrete type.
pub(crate) trait AnySystem: System {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<S: System + 'static> AnySystem for S {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub(crate) type BoxedSystem = Box<dyn AnySystem + 'static>;

/// A system built from a closure.
pub struct FnSystem<F: FnMut(&mut Engine) + Send>(pub F);

impl<F: FnMut(&mut Engine) + Send> System for FnSystem<F> {
    fn update(&mut self, engine: &mut Engine) {
        (self.0)(engine)
    }
}
