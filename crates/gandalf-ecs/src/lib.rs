//! Gandalf ECS -- sparse-set Entity Component System with cached system
//! filters.
//!
//! Entities are generational handles with a UUID recorded by the world.
//! Components of each type live in their own [`SparseSet`](storage::SparseSet).
//! Systems declare the component types they need; the owning [`Scene`]
//! keeps each system's cache of matching entities current as components are
//! added and removed, and drives the create / update / gui-update hooks.
//!
//! # Quick Start
//!
//! ```
//! use gandalf_ecs::prelude::*;
//!
//! struct Position(f32);
//! struct Velocity(f32);
//!
//! struct Movement {
//!     base: SystemBase,
//! }
//!
//! impl System for Movement {
//!     fn base(&self) -> &SystemBase {
//!         &self.base
//!     }
//!     fn base_mut(&mut self) -> &mut SystemBase {
//!         &mut self.base
//!     }
//!     fn on_update_entity(&mut self, world: &mut World, ts: f32, entity: Entity) {
//!         let v = world.get_component::<Velocity>(entity).map_or(0.0, |v| v.0);
//!         if let Some(p) = world.get_component_mut::<Position>(entity) {
//!             p.0 += v * ts;
//!         }
//!     }
//! }
//!
//! let mut scene = Scene::new("demo");
//! scene.register_system(Movement {
//!     base: SystemBase::with_filter::<(Position, Velocity)>("movement"),
//! });
//! let e = scene.enroll_entity();
//! scene.add_component(e, Position(0.0));
//! scene.add_component(e, Velocity(2.0));
//! scene.on_update(0.5);
//! assert_eq!(scene.get_component::<Position>(e).unwrap().0, 1.0);
//! ```

#![deny(unsafe_code)]

pub mod component;
pub mod entity;
pub mod hierarchy;
pub mod scene;
pub mod scene_manager;
pub mod snapshot;
pub mod storage;
pub mod system;
pub mod world;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by ECS operations.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// A snapshot referenced a component name with no registered hooks.
    #[error("component type '{name}' not registered. Registered components: [{registered}]")]
    UnknownComponent { name: String, registered: String },

    /// Deserialization of a component value failed.
    #[error("failed to deserialize component '{component}': {details}")]
    ComponentDeserialization { component: String, details: String },

    /// A restored entity's UUID is already present in the target scene.
    #[error("entity with uuid {0} already exists in the scene")]
    DuplicateUuid(uuid::Uuid),

    #[error("snapshot (de)serialization failed: {0}")]
    Serialization(String),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::component::{
        Component, ComponentInfo, ComponentKey, ComponentRegistry, ComponentSet, ComponentTypeId,
        SerdeHooks,
    };
    pub use crate::entity::{Entity, EntityAllocator};
    pub use crate::hierarchy::LinkComponent;
    pub use crate::scene::{EditorVisibleComponent, Scene};
    pub use crate::scene_manager::{SceneChanged, SceneChanger, SceneId, SceneManager};
    pub use crate::snapshot::{EntitySnapshot, SceneSnapshot};
    pub use crate::storage::SparseSet;
    pub use crate::system::{System, SystemBase, SystemState, SystemStateChanged};
    pub use crate::world::{StructuralChange, World};
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[derive(Debug, Clone, PartialEq)]
    struct A(u32);
    #[derive(Debug, Clone, PartialEq)]
    struct B(u32);

    struct Pair {
        base: SystemBase,
    }

    impl System for Pair {
        fn base(&self) -> &SystemBase {
            &self.base
        }
        fn base_mut(&mut self) -> &mut SystemBase {
            &mut self.base
        }
        fn on_update_entity(&mut self, world: &mut World, _ts: f32, entity: Entity) {
            if let Some(a) = world.get_component_mut::<A>(entity) {
                a.0 += 1;
            }
        }
    }

    #[test]
    fn direct_world_mutation_reaches_systems_on_next_frame() {
        let mut scene = Scene::new("main");
        scene.register_system(Pair {
            base: SystemBase::with_filter::<(A, B)>("pair"),
        });
        let e = scene.enroll_entity();
        scene.world_mut().add_component(e, A(0));
        scene.world_mut().add_component(e, B(0));
        scene.on_update(0.0);
        assert_eq!(scene.get_component::<A>(e), Some(&A(1)));

        scene.world_mut().remove_component::<B>(e);
        scene.on_update(0.0);
        assert_eq!(scene.get_component::<A>(e), Some(&A(1)));
    }

    #[test]
    fn destroyed_handle_does_not_alias_new_entity() {
        let mut scene = Scene::new("main");
        let old = scene.enroll_entity();
        scene.add_component(old, A(7));
        scene.destroy_entity(old);
        let new = scene.enroll_entity();
        assert_eq!(new.index(), old.index());
        assert!(scene.get_component::<A>(old).is_none());
        assert!(scene.get_component::<A>(new).is_none());
    }
}
