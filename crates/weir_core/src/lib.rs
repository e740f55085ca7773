//! Weir Core
//!
//! In-memory columnar entity storage with deferred structural mutation:
//! - Entities grouped into partitions, one dense store per component type
//! - Builds, removals, and migrations queue and apply on submission
//! - Structural event callbacks that may queue further work, capped by a
//!   convergence limit
//! - Generational tokens that keep addressing an entity across moves

pub mod builder;
pub mod component;
pub mod deferred;
pub mod entity;
pub mod error;
mod group;
pub mod locator;
mod oplog;
mod pending;
pub mod reactor;
pub mod scheduler;
pub mod storage;
mod submit;
pub mod world;

pub use builder::{ComponentSet, EntityComposer};
pub use component::{Component, ComponentRegistry, ComponentTypeId, StoreKind};
pub use deferred::DeferredOps;
pub use entity::{key, EntityId, EntityKey, GroupId};
pub use error::{ResolveError, SubmitError, UsageError};
pub use locator::EntityToken;
pub use reactor::{
    EntityEvent, EntityReactor, EventKind, EventMask, RangeEvent, RangeReactor, TickObserver,
};
pub use scheduler::TickDriver;
pub use storage::{DenseStore, StoreError, SwapBackLog};
pub use submit::MAX_SUBMISSION_ITERATIONS;
pub use world::World;

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
