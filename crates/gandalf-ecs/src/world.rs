//! The [`World`] is the entity/component store owned by a
//! [`Scene`](crate::scene::Scene). It owns the entity allocator, the component
//! registry and one [`SparseSet`] per component type.
//!
//! Every structural mutation (component added, component removed, entity
//! destroyed) is appended to a change log. The owning scene drains that log to
//! keep system caches in sync, which is what lets systems mutate the world
//! from inside their hooks without the world knowing about systems.

use std::collections::HashMap;

use uuid::Uuid;

use crate::component::{Component, ComponentKey, ComponentRegistry, ComponentTypeId};
use crate::entity::{Entity, EntityAllocator};
use crate::storage::{ErasedStorage, SparseSet};
use crate::EcsError;

// ---------------------------------------------------------------------------
// StructuralChange
// ---------------------------------------------------------------------------

/// A structural mutation recorded by the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuralChange {
    Added { entity: Entity, key: ComponentKey },
    Removed { entity: Entity, key: ComponentKey },
    Destroyed { entity: Entity },
}

// ---------------------------------------------------------------------------
// EntityRecord
// ---------------------------------------------------------------------------

/// Component types an entity owns, in the order they were added.
#[derive(Debug, Clone, Default)]
struct EntityRecord {
    components: Vec<ComponentTypeId>,
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

pub struct World {
    pub(crate) allocator: EntityAllocator,
    pub(crate) registry: ComponentRegistry,
    /// Indexed by `ComponentTypeId`.
    storages: Vec<Option<Box<dyn ErasedStorage>>>,
    /// Live entities in creation order.
    entities: Vec<Entity>,
    records: HashMap<Entity, EntityRecord>,
    changes: Vec<StructuralChange>,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entity_count", &self.entities.len())
            .field("component_types", &self.registry.len())
            .finish()
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        Self {
            allocator: EntityAllocator::new(),
            registry: ComponentRegistry::new(),
            storages: Vec::new(),
            entities: Vec::new(),
            records: HashMap::new(),
            changes: Vec::new(),
        }
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ComponentRegistry {
        &mut self.registry
    }

    /// Register `T` for snapshots under `name`.
    pub fn register_component<T>(&mut self, name: &str) -> ComponentTypeId
    where
        T: Component + serde::Serialize + serde::de::DeserializeOwned,
    {
        let id = self.registry.register_serde::<T>(name);
        self.ensure_storage::<T>(id);
        id
    }

    // -- entity lifecycle ---------------------------------------------------

    /// Create an entity with a fresh v4 UUID.
    pub fn spawn(&mut self) -> Entity {
        loop {
            if let Ok(entity) = self.spawn_with_uuid(Uuid::new_v4()) {
                return entity;
            }
        }
    }

    /// Create an entity that keeps a known identity, as snapshot restore
    /// does.
    pub fn spawn_with_uuid(&mut self, uuid: Uuid) -> Result<Entity, EcsError> {
        let entity = self.allocator.allocate(uuid).ok_or(EcsError::DuplicateUuid(uuid))?;
        self.entities.push(entity);
        self.records.insert(entity, EntityRecord::default());
        Ok(entity)
    }

    /// Remove every component of `entity` and free its handle.
    ///
    /// Does not touch other entities; hierarchy-aware destruction lives in
    /// [`Scene::destroy_entity`](crate::scene::Scene::destroy_entity).
    pub fn despawn(&mut self, entity: Entity) -> bool {
        let Some(record) = self.records.remove(&entity) else {
            return false;
        };
        for type_id in record.components {
            if let Some(storage) = self.storages[type_id.index()].as_mut() {
                storage.remove_entity(entity);
            }
            if let Some(info) = self.registry.get_info(type_id) {
                self.changes.push(StructuralChange::Removed {
                    entity,
                    key: info.key,
                });
            }
        }
        self.entities.retain(|e| *e != entity);
        self.allocator.deallocate(entity);
        self.changes.push(StructuralChange::Destroyed { entity });
        true
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.allocator.is_alive(entity)
    }

    /// Live entities in creation order.
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn uuid(&self, entity: Entity) -> Option<Uuid> {
        self.allocator.uuid(entity)
    }

    pub fn find_by_uuid(&self, uuid: Uuid) -> Option<Entity> {
        self.allocator.find(uuid)
    }

    /// Component types owned by `entity`, in the order they were added.
    pub fn component_types(&self, entity: Entity) -> &[ComponentTypeId] {
        self.records
            .get(&entity)
            .map(|r| r.components.as_slice())
            .unwrap_or(&[])
    }

    // -- storage access -----------------------------------------------------

    fn ensure_storage<T: Component>(&mut self, id: ComponentTypeId) -> &mut SparseSet<T> {
        let idx = id.index();
        if self.storages.len() <= idx {
            self.storages.resize_with(idx + 1, || None);
        }
        self.storages[idx]
            .get_or_insert_with(|| Box::new(SparseSet::<T>::new()))
            .as_any_mut()
            .downcast_mut::<SparseSet<T>>()
            .expect("storage type matches its registry id")
    }

    pub fn storage<T: Component>(&self) -> Option<&SparseSet<T>> {
        let id = self.registry.lookup_type::<T>()?;
        self.storages
            .get(id.index())?
            .as_ref()?
            .as_any()
            .downcast_ref::<SparseSet<T>>()
    }

    pub fn storage_mut<T: Component>(&mut self) -> Option<&mut SparseSet<T>> {
        let id = self.registry.lookup_type::<T>()?;
        self.storages
            .get_mut(id.index())?
            .as_mut()?
            .as_any_mut()
            .downcast_mut::<SparseSet<T>>()
    }

    pub(crate) fn erased_storage(&self, id: ComponentTypeId) -> Option<&dyn ErasedStorage> {
        self.storages.get(id.index())?.as_deref()
    }

    // -- components ---------------------------------------------------------

    /// Attach `value` to `entity`.
    ///
    /// Idempotent: if the entity already owns a `T`, the new value is dropped
    /// and the existing one is returned unchanged. Returns `None` only for a
    /// dead entity.
    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> Option<&mut T> {
        if !self.is_alive(entity) {
            tracing::warn!(
                %entity,
                component = std::any::type_name::<T>(),
                "add_component on a dead entity -- ignored"
            );
            return None;
        }
        let key = ComponentKey::of::<T>();
        let id = self.registry.ensure(key);
        if self.ensure_storage::<T>(id).insert(entity, value) {
            if let Some(record) = self.records.get_mut(&entity) {
                record.components.push(id);
            }
            self.changes.push(StructuralChange::Added { entity, key });
        }
        self.get_component_mut::<T>(entity)
    }

    /// Detach and return the entity's `T`, if any.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Option<T> {
        let id = self.registry.lookup_type::<T>()?;
        let value = self.storage_mut::<T>()?.remove(entity)?;
        self.forget_component(entity, id, ComponentKey::of::<T>());
        Some(value)
    }

    /// Type-erased removal; returns whether a component was removed.
    pub fn remove_component_by_key(&mut self, entity: Entity, key: &ComponentKey) -> bool {
        let Some(id) = self.registry.lookup(key) else {
            return false;
        };
        let removed = self
            .storages
            .get_mut(id.index())
            .and_then(|s| s.as_mut())
            .map(|s| s.remove_entity(entity))
            .unwrap_or(false);
        if removed {
            self.forget_component(entity, id, *key);
        }
        removed
    }

    fn forget_component(&mut self, entity: Entity, id: ComponentTypeId, key: ComponentKey) {
        if let Some(record) = self.records.get_mut(&entity) {
            record.components.retain(|c| *c != id);
        }
        self.changes.push(StructuralChange::Removed { entity, key });
    }

    pub(crate) fn insert_erased(
        &mut self,
        entity: Entity,
        id: ComponentTypeId,
        value: Box<dyn std::any::Any>,
    ) -> bool {
        let Some(key) = self.registry.get_info(id).map(|i| i.key) else {
            return false;
        };
        let inserted = self
            .storages
            .get_mut(id.index())
            .and_then(|s| s.as_mut())
            .map(|s| s.insert_any(entity, value))
            .unwrap_or(false);
        if inserted {
            if let Some(record) = self.records.get_mut(&entity) {
                record.components.push(id);
            }
            self.changes.push(StructuralChange::Added { entity, key });
        }
        inserted
    }

    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        self.storage::<T>().is_some_and(|s| s.contains(entity))
    }

    pub fn has_key(&self, entity: Entity, key: &ComponentKey) -> bool {
        self.registry
            .lookup(key)
            .and_then(|id| self.erased_storage(id))
            .is_some_and(|s| s.contains(entity))
    }

    /// Whether `entity` owns every component in `keys`.
    pub fn satisfies(&self, entity: Entity, keys: &[ComponentKey]) -> bool {
        self.is_alive(entity) && keys.iter().all(|k| self.has_key(entity, k))
    }

    pub fn get_component<T: Component>(&self, entity: Entity) -> Option<&T> {
        self.storage::<T>()?.get(entity)
    }

    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        self.storage_mut::<T>()?.get_mut(entity)
    }

    /// Iterate every `(entity, &T)` pair in storage order.
    pub fn iter<T: Component>(&self) -> impl Iterator<Item = (Entity, &T)> {
        self.storage::<T>().into_iter().flat_map(|s| s.iter())
    }

    /// First entity owning a `T` that matches `pred`.
    pub fn find<T: Component>(&self, mut pred: impl FnMut(&T) -> bool) -> Option<Entity> {
        self.iter::<T>().find(|(_, c)| pred(c)).map(|(e, _)| e)
    }

    // -- change log ---------------------------------------------------------

    /// Take every structural change recorded since the last call.
    pub fn drain_changes(&mut self) -> Vec<StructuralChange> {
        std::mem::take(&mut self.changes)
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
