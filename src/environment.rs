//! Dependency injection for action bodies.
//!
//! A tree carries at most one environment, fixed when the tree is built and
//! shared unchanged by every node in it.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// An opaque, shareable value attached to a tree.
#[derive(Clone)]
pub struct Environment(Arc<dyn Any + Send + Sync>);

impl Environment {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Environment(Arc::new(value))
    }

    /// Borrow the environment as `T`, if that is what it holds.
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Environment(..)")
    }
}
