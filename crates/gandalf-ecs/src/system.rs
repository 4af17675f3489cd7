//! Systems: filtered entity caches plus lifecycle hooks.
//!
//! A system declares an ordered list of required component types. The owning
//! [`Scene`](crate::scene::Scene) keeps each system's cache of qualifying
//! entities up to date incrementally as components come and go; the system
//! only ever sees entities that hold every required component.
//!
//! Each frame the scene drives three dispatch points through the provided
//! `*_base` methods of [`System`]. All of them are no-ops while the system is
//! [`SystemState::Pause`]d.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::component::{ComponentKey, ComponentSet};
use crate::entity::Entity;
use crate::world::World;

// ---------------------------------------------------------------------------
// SystemState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystemState {
    /// Not yet started by a running scene.
    #[default]
    None,
    Play,
    Pause,
}

/// Emitted by [`SystemBase::set_state`] on every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemStateChanged {
    pub system: String,
    pub previous: SystemState,
    pub current: SystemState,
}

pub type StateListener = Box<dyn FnMut(&SystemStateChanged)>;

// ---------------------------------------------------------------------------
// SystemBase
// ---------------------------------------------------------------------------

/// State shared by every system: filter, entity cache, lifecycle state.
pub struct SystemBase {
    name: String,
    filters: Vec<ComponentKey>,
    /// Cached entities in insertion order.
    entities: Vec<Entity>,
    members: HashSet<Entity>,
    /// Cached entities whose create hook has not run yet.
    pending_create: Vec<Entity>,
    created: bool,
    state: SystemState,
    listeners: Vec<StateListener>,
}

impl std::fmt::Debug for SystemBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemBase")
            .field("name", &self.name)
            .field("filters", &self.filters)
            .field("entities", &self.entities.len())
            .field("state", &self.state)
            .finish()
    }
}

impl SystemBase {
    pub fn new(name: impl Into<String>, filters: Vec<ComponentKey>) -> Self {
        Self {
            name: name.into(),
            filters,
            entities: Vec::new(),
            members: HashSet::new(),
            pending_create: Vec::new(),
            created: false,
            state: SystemState::None,
            listeners: Vec::new(),
        }
    }

    /// Build a base whose filter is the component tuple `S`.
    pub fn with_filter<S: ComponentSet>(name: impl Into<String>) -> Self {
        Self::new(name, S::keys())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filters(&self) -> &[ComponentKey] {
        &self.filters
    }

    pub fn requires(&self, key: &ComponentKey) -> bool {
        self.filters.contains(key)
    }

    /// Cached entities in insertion order.
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.members.contains(&entity)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Entities waiting for their create hook.
    pub fn pending_create(&self) -> &[Entity] {
        &self.pending_create
    }

    /// Cache `entity` if it satisfies the full filter.
    ///
    /// Returns `true` only when the entity was newly cached. An empty filter
    /// never matches.
    pub fn filter_entity_components(&mut self, world: &World, entity: Entity) -> bool {
        if self.filters.is_empty() || self.members.contains(&entity) {
            return false;
        }
        if !world.satisfies(entity, &self.filters) {
            return false;
        }
        self.members.insert(entity);
        self.entities.push(entity);
        self.pending_create.push(entity);
        true
    }

    /// Evict `entity` from the cache; returns whether it was cached.
    pub fn remove_entity_components(&mut self, entity: Entity) -> bool {
        if !self.members.remove(&entity) {
            return false;
        }
        self.entities.retain(|e| *e != entity);
        self.pending_create.retain(|e| *e != entity);
        true
    }

    pub fn state(&self) -> SystemState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        self.state == SystemState::Pause
    }

    /// Transition to `state`, notifying listeners if it differs.
    pub fn set_state(&mut self, state: SystemState) {
        if self.state == state {
            return;
        }
        let event = SystemStateChanged {
            system: self.name.clone(),
            previous: self.state,
            current: state,
        };
        self.state = state;
        tracing::debug!(system = %self.name, from = ?event.previous, to = ?state, "system state changed");
        for listener in &mut self.listeners {
            listener(&event);
        }
    }

    pub fn on_state_change(&mut self, listener: impl FnMut(&SystemStateChanged) + 'static) {
        self.listeners.push(Box::new(listener));
    }
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

/// A unit of behavior run by a [`Scene`](crate::scene::Scene).
///
/// Implementors provide access to their [`SystemBase`] and override whichever
/// hooks they need. The `*_base` methods are the dispatch points the scene
/// calls; they are not meant to be overridden.
pub trait System: 'static {
    fn base(&self) -> &SystemBase;
    fn base_mut(&mut self) -> &mut SystemBase;

    /// Runs once, before the first entity create hook.
    fn on_create_system(&mut self, _world: &mut World) {}

    /// Runs once per cached entity, before its first update.
    fn on_create_entity(&mut self, _world: &mut World, _entity: Entity) {}

    /// Runs every frame before the per-entity hooks.
    fn on_update_system(&mut self, _world: &mut World, _ts: f32) {}

    fn on_update_entity(&mut self, _world: &mut World, _ts: f32, _entity: Entity) {}

    fn on_gui_update_system(&mut self, _world: &mut World) {}

    fn on_gui_update_entity(&mut self, _world: &mut World, _entity: Entity) {}

    fn name(&self) -> &str {
        self.base().name()
    }

    /// Run the system create hook (once) and every pending entity create
    /// hook. Paused systems keep their entities pending.
    fn on_create_base(&mut self, world: &mut World) {
        if self.base().is_paused() {
            return;
        }
        if !self.base().created {
            self.base_mut().created = true;
            self.on_create_system(world);
        }
        let pending = std::mem::take(&mut self.base_mut().pending_create);
        for entity in pending {
            if self.base().contains(entity) && world.is_alive(entity) {
                self.on_create_entity(world, entity);
            }
        }
    }

    /// System hook first, then the entity hook over the cache in insertion
    /// order.
    fn on_update_base(&mut self, world: &mut World, ts: f32) {
        if self.base().is_paused() {
            return;
        }
        self.on_update_system(world, ts);
        let mut i = 0;
        while let Some(&entity) = self.base().entities.get(i) {
            self.on_update_entity(world, ts, entity);
            i += 1;
        }
    }

    fn on_gui_update_base(&mut self, world: &mut World) {
        if self.base().is_paused() {
            return;
        }
        self.on_gui_update_system(world);
        let mut i = 0;
        while let Some(&entity) = self.base().entities.get(i) {
            self.on_gui_update_entity(world, entity);
            i += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Pos;
    struct Vel;

    #[derive(Default)]
    struct Calls {
        system_creates: u32,
        entity_creates: Vec<Entity>,
        updates: Vec<Entity>,
    }

    struct Counting {
        base: SystemBase,
        calls: Rc<RefCell<Calls>>,
    }

    impl System for Counting {
        fn base(&self) -> &SystemBase {
            &self.base
        }
        fn base_mut(&mut self) -> &mut SystemBase {
            &mut self.base
        }
        fn on_create_system(&mut self, _world: &mut World) {
            self.calls.borrow_mut().system_creates += 1;
        }
        fn on_create_entity(&mut self, _world: &mut World, entity: Entity) {
            self.calls.borrow_mut().entity_creates.push(entity);
        }
        fn on_update_entity(&mut self, _world: &mut World, _ts: f32, entity: Entity) {
            self.calls.borrow_mut().updates.push(entity);
        }
    }

    fn counting() -> (Counting, Rc<RefCell<Calls>>) {
        let calls = Rc::new(RefCell::new(Calls::default()));
        let system = Counting {
            base: SystemBase::with_filter::<(Pos, Vel)>("counting"),
            calls: calls.clone(),
        };
        (system, calls)
    }

    #[test]
    fn filter_is_conjunctive_and_never_duplicates() {
        let mut world = World::new();
        let (mut system, _) = counting();
        let e = world.spawn();
        world.add_component(e, Pos);
        assert!(!system.base_mut().filter_entity_components(&world, e));
        world.add_component(e, Vel);
        assert!(system.base_mut().filter_entity_components(&world, e));
        assert!(!system.base_mut().filter_entity_components(&world, e));
        assert_eq!(system.base().entities(), &[e]);
    }

    #[test]
    fn remove_reports_membership() {
        let mut world = World::new();
        let (mut system, _) = counting();
        let e = world.spawn();
        world.add_component(e, Pos);
        world.add_component(e, Vel);
        system.base_mut().filter_entity_components(&world, e);
        assert!(system.base_mut().remove_entity_components(e));
        assert!(!system.base_mut().remove_entity_components(e));
        assert!(system.base().is_empty());
        assert!(system.base().pending_create().is_empty());
    }

    #[test]
    fn create_then_update_in_insertion_order() {
        let mut world = World::new();
        let (mut system, calls) = counting();
        let entities: Vec<Entity> = (0..3)
            .map(|_| {
                let e = world.spawn();
                world.add_component(e, Vel);
                world.add_component(e, Pos);
                e
            })
            .collect();
        for &e in entities.iter().rev() {
            system.base_mut().filter_entity_components(&world, e);
        }

        system.on_create_base(&mut world);
        system.on_create_base(&mut world);
        system.on_update_base(&mut world, 0.016);

        let calls = calls.borrow();
        assert_eq!(calls.system_creates, 1);
        let expected: Vec<Entity> = entities.iter().rev().copied().collect();
        assert_eq!(calls.entity_creates, expected);
        assert_eq!(calls.updates, expected);
    }

    #[test]
    fn paused_system_runs_no_hooks_but_keeps_cache() {
        let mut world = World::new();
        let (mut system, calls) = counting();
        let e = world.spawn();
        world.add_component(e, Pos);
        world.add_component(e, Vel);
        system.base_mut().filter_entity_components(&world, e);

        system.base_mut().set_state(SystemState::Pause);
        system.on_create_base(&mut world);
        system.on_update_base(&mut world, 0.016);
        system.on_gui_update_base(&mut world);
        assert_eq!(calls.borrow().system_creates, 0);
        assert!(calls.borrow().updates.is_empty());
        assert_eq!(system.base().entities(), &[e]);
        assert_eq!(system.base().pending_create(), &[e]);

        system.base_mut().set_state(SystemState::Play);
        system.on_create_base(&mut world);
        system.on_update_base(&mut world, 0.016);
        assert_eq!(calls.borrow().entity_creates, vec![e]);
        assert_eq!(calls.borrow().updates, vec![e]);
    }

    #[test]
    fn state_listeners_see_transitions() {
        let (mut system, _) = counting();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        system
            .base_mut()
            .on_state_change(move |ev| sink.borrow_mut().push((ev.previous, ev.current)));

        system.base_mut().set_state(SystemState::Play);
        system.base_mut().set_state(SystemState::Play);
        system.base_mut().set_state(SystemState::Pause);
        assert_eq!(
            *seen.borrow(),
            vec![
                (SystemState::None, SystemState::Play),
                (SystemState::Play, SystemState::Pause)
            ]
        );
    }
}
