//! A [`Scene`] owns a [`World`] and the systems that run over it.
//!
//! Every structural change to the world goes through the world's change log;
//! the scene drains that log after each mutation it performs and after every
//! system dispatch, so system caches always reflect the current component
//! sets before the next hook runs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::component::Component;
use crate::entity::Entity;
use crate::hierarchy::LinkComponent;
use crate::system::{System, SystemState, SystemStateChanged};
use crate::world::{StructuralChange, World};

/// Marker attached to every enrolled entity; read by editor tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditorVisibleComponent {
    pub editor_visible: bool,
}

impl Default for EditorVisibleComponent {
    fn default() -> Self {
        Self {
            editor_visible: true,
        }
    }
}

pub struct Scene {
    name: String,
    world: World,
    systems: Vec<Box<dyn System>>,
    running: bool,
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("name", &self.name)
            .field("entities", &self.world.entity_count())
            .field(
                "systems",
                &self.systems.iter().map(|s| s.name().to_owned()).collect::<Vec<_>>(),
            )
            .field("running", &self.running)
            .finish()
    }
}

impl Scene {
    pub fn new(name: impl Into<String>) -> Self {
        let mut world = World::new();
        world.register_component::<EditorVisibleComponent>("EditorVisibleComponent");
        world.register_component::<LinkComponent>("LinkComponent");
        Self {
            name: name.into(),
            world,
            systems: Vec::new(),
            running: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Direct world access. Structural changes made through it reach the
    /// systems at the next [`sync_systems`](Self::sync_systems) or dispatch.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    // -- entities -----------------------------------------------------------

    /// Create an entity with a fresh UUID and an [`EditorVisibleComponent`].
    pub fn enroll_entity(&mut self) -> Entity {
        let entity = self.world.spawn();
        self.world
            .add_component(entity, EditorVisibleComponent::default());
        self.sync_systems();
        entity
    }

    pub fn entities(&self) -> &[Entity] {
        self.world.entities()
    }

    pub fn entity_uuid(&self, entity: Entity) -> Option<Uuid> {
        self.world.uuid(entity)
    }

    pub fn find_entity_by_uuid(&self, uuid: Uuid) -> Option<Entity> {
        self.world.find_by_uuid(uuid)
    }

    /// Destroy `entity` together with every descendant listed in its
    /// [`LinkComponent`], and detach it from its parent.
    pub fn destroy_entity(&mut self, entity: Entity) -> bool {
        if !self.world.is_alive(entity) {
            return false;
        }
        if let Some(link) = self.world.get_component::<LinkComponent>(entity) {
            let parents = [link.parent, link.prev_parent];
            for parent in parents.into_iter().flatten() {
                if let Some(parent_link) = self.world.get_component_mut::<LinkComponent>(parent) {
                    parent_link.children.retain(|c| *c != entity);
                }
            }
        }
        self.destroy_subtree(entity);
        self.sync_systems();
        true
    }

    fn destroy_subtree(&mut self, entity: Entity) {
        let children = self
            .world
            .get_component::<LinkComponent>(entity)
            .map(|l| l.children.clone())
            .unwrap_or_default();
        for child in children {
            if self.world.is_alive(child) {
                self.destroy_subtree(child);
            }
        }
        self.world.despawn(entity);
    }

    // -- components ---------------------------------------------------------

    /// Attach `component`; returns the existing value unchanged if the entity
    /// already has one of this type.
    pub fn add_component<T: Component>(&mut self, entity: Entity, component: T) -> Option<&mut T> {
        self.world.add_component(entity, component)?;
        self.sync_systems();
        self.world.get_component_mut::<T>(entity)
    }

    /// Detach the entity's `T`. No-op if absent.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Option<T> {
        let removed = self.world.remove_component::<T>(entity);
        self.sync_systems();
        removed
    }

    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        self.world.has_component::<T>(entity)
    }

    pub fn get_component<T: Component>(&self, entity: Entity) -> Option<&T> {
        self.world.get_component(entity)
    }

    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        self.world.get_component_mut(entity)
    }

    // -- systems ------------------------------------------------------------

    /// Append `system`, cache every existing entity that matches it and, if
    /// the scene is already running, run its create hooks right away.
    pub fn register_system<S: System>(&mut self, system: S) {
        self.sync_systems();
        let mut system: Box<dyn System> = Box::new(system);
        for &entity in self.world.entities() {
            system.base_mut().filter_entity_components(&self.world, entity);
        }
        tracing::info!(
            scene = %self.name,
            system = %system.name(),
            cached = system.base().len(),
            "system registered"
        );
        self.systems.push(system);
        if self.running {
            let idx = self.systems.len() - 1;
            self.start_system(idx);
            self.sync_systems();
        }
    }

    fn start_system(&mut self, idx: usize) {
        let system = &mut self.systems[idx];
        if system.base().state() == SystemState::None {
            system.base_mut().set_state(SystemState::Play);
        }
        system.on_create_base(&mut self.world);
    }

    pub fn system_names(&self) -> impl Iterator<Item = &str> {
        self.systems.iter().map(|s| s.name())
    }

    pub fn system(&self, name: &str) -> Option<&dyn System> {
        self.systems
            .iter()
            .find(|s| s.name() == name)
            .map(|s| &**s)
    }

    pub fn system_mut(&mut self, name: &str) -> Option<&mut (dyn System + 'static)> {
        self.systems
            .iter_mut()
            .find(|s| s.name() == name)
            .map(|s| &mut **s)
    }

    pub fn system_state(&self, name: &str) -> Option<SystemState> {
        self.system(name).map(|s| s.base().state())
    }

    /// Returns `false` if no system has that name.
    pub fn set_system_state(&mut self, name: &str, state: SystemState) -> bool {
        match self.system_mut(name) {
            Some(system) => {
                system.base_mut().set_state(state);
                true
            }
            None => {
                tracing::warn!(scene = %self.name, system = name, "no such system");
                false
            }
        }
    }

    pub fn on_system_state_change(
        &mut self,
        name: &str,
        listener: impl FnMut(&SystemStateChanged) + 'static,
    ) -> bool {
        match self.system_mut(name) {
            Some(system) => {
                system.base_mut().on_state_change(listener);
                true
            }
            None => false,
        }
    }

    // -- lifecycle ----------------------------------------------------------

    /// Start the scene: every system moves to `Play` and runs its create
    /// hooks.
    pub fn on_create(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        tracing::info!(scene = %self.name, systems = self.systems.len(), "scene started");
        self.sync_systems();
        for idx in 0..self.systems.len() {
            self.start_system(idx);
            self.sync_systems();
        }
    }

    /// Run one frame: pending create hooks, then the update hooks, system by
    /// system in registration order.
    pub fn on_update(&mut self, ts: f32) {
        if !self.running {
            self.on_create();
        }
        for idx in 0..self.systems.len() {
            self.sync_systems();
            let system = &mut self.systems[idx];
            system.on_create_base(&mut self.world);
            self.sync_systems();
            self.systems[idx].on_update_base(&mut self.world, ts);
        }
        self.sync_systems();
    }

    pub fn on_gui_update(&mut self) {
        for idx in 0..self.systems.len() {
            self.systems[idx].on_gui_update_base(&mut self.world);
            self.sync_systems();
        }
    }

    /// Apply the world's pending structural changes to every system cache.
    pub fn sync_systems(&mut self) {
        if !self.world.has_pending_changes() {
            return;
        }
        for change in self.world.drain_changes() {
            match change {
                StructuralChange::Added { entity, key } => {
                    for system in &mut self.systems {
                        if system.base().requires(&key) {
                            system.base_mut().filter_entity_components(&self.world, entity);
                        }
                    }
                }
                StructuralChange::Removed { entity, key } => {
                    for system in &mut self.systems {
                        if system.base().requires(&key) {
                            system.base_mut().remove_entity_components(entity);
                        }
                    }
                }
                StructuralChange::Destroyed { entity } => {
                    for system in &mut self.systems {
                        system.base_mut().remove_entity_components(entity);
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
