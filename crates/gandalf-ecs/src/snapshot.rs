//! Scene snapshot and restore support.
//!
//! A [`SceneSnapshot`] maps every entity (by UUID) to the JSON form of each of
//! its serializable components, keyed by the component's registered name.
//! Only types registered through
//! [`World::register_component`](crate::world::World::register_component) or
//! [`ComponentRegistry::register_with_hooks`](crate::component::ComponentRegistry::register_with_hooks)
//! are captured; everything else is runtime-only state.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::Entity;
use crate::hierarchy::LinkComponent;
use crate::scene::Scene;
use crate::world::World;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub uuid: Uuid,
    /// Handle the entity had when captured; used to remap links.
    pub entity: Entity,
    /// Registered component name to its serialized value.
    pub components: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSnapshot {
    pub scene: String,
    /// Entities in creation order.
    pub entities: Vec<EntitySnapshot>,
}

impl SceneSnapshot {
    /// Capture every serializable component of every live entity.
    pub fn capture(scene: &Scene) -> Self {
        let world = scene.world();
        let mut entities = Vec::with_capacity(world.entity_count());
        for &entity in world.entities() {
            let Some(uuid) = world.uuid(entity) else {
                continue;
            };
            entities.push(EntitySnapshot {
                uuid,
                entity,
                components: capture_components(world, entity),
            });
        }
        Self {
            scene: scene.name().to_owned(),
            entities,
        }
    }

    pub fn to_json(&self) -> Result<String, EcsError> {
        serde_json::to_string_pretty(self).map_err(|e| EcsError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, EcsError> {
        serde_json::from_str(json).map_err(|e| EcsError::Serialization(e.to_string()))
    }

    /// BLAKE3 digest of the snapshot's compact JSON form, hex encoded.
    pub fn hash(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }

    /// Recreate the snapshot's entities inside `scene`.
    ///
    /// Entities keep their UUIDs but receive fresh handles; link parents and
    /// children are remapped onto the new handles. Fails without touching
    /// `scene` if a component name is unknown or a value does not
    /// deserialize.
    pub fn restore_into(&self, scene: &mut Scene) -> Result<Vec<Entity>, EcsError> {
        let decoded = self.decode(scene.world())?;

        let mut seen = HashSet::new();
        if let Some(dup) = self
            .entities
            .iter()
            .find(|s| !seen.insert(s.uuid) || scene.world().find_by_uuid(s.uuid).is_some())
        {
            return Err(EcsError::DuplicateUuid(dup.uuid));
        }

        let mut remap: HashMap<Entity, Entity> = HashMap::new();
        let mut restored = Vec::with_capacity(decoded.len());
        for (snapshot, components) in self.entities.iter().zip(decoded) {
            let entity = scene.world_mut().spawn_with_uuid(snapshot.uuid)?;
            remap.insert(snapshot.entity, entity);
            for (id, value) in components {
                scene.world_mut().insert_erased(entity, id, value);
            }
            restored.push(entity);
        }

        for &entity in &restored {
            if let Some(link) = scene.world_mut().get_component_mut::<LinkComponent>(entity) {
                let map = |e: Entity| remap.get(&e).copied();
                link.parent = link.parent.and_then(map);
                link.prev_parent = link.prev_parent.and_then(map);
                link.children = link.children.iter().filter_map(|c| map(*c)).collect();
            }
        }
        scene.sync_systems();
        tracing::info!(
            scene = %scene.name(),
            entities = restored.len(),
            "snapshot restored"
        );
        Ok(restored)
    }

    #[allow(clippy::type_complexity)]
    fn decode(
        &self,
        world: &World,
    ) -> Result<Vec<Vec<(crate::component::ComponentTypeId, Box<dyn std::any::Any>)>>, EcsError>
    {
        let registry = world.registry();
        self.entities
            .iter()
            .map(|snapshot| {
                snapshot
                    .components
                    .iter()
                    .map(|(name, value)| {
                        let found = registry
                            .lookup_by_name(name)
                            .and_then(|id| registry.get_info(id))
                            .and_then(|info| info.hooks.as_ref().map(|hooks| (info.id, hooks)));
                        let Some((id, hooks)) = found else {
                            return Err(EcsError::UnknownComponent {
                                name: name.clone(),
                                registered: registry.serializable_names().join(", "),
                            });
                        };
                        let boxed = (hooks.deserialize)(value).map_err(|details| {
                            EcsError::ComponentDeserialization {
                                component: name.clone(),
                                details,
                            }
                        })?;
                        Ok((id, boxed))
                    })
                    .collect()
            })
            .collect()
    }
}

fn capture_components(world: &World, entity: Entity) -> BTreeMap<String, serde_json::Value> {
    let registry = world.registry();
    let mut components = BTreeMap::new();
    for &id in world.component_types(entity) {
        let Some(info) = registry.get_info(id) else {
            continue;
        };
        let Some(hooks) = info.hooks.as_ref() else {
            continue;
        };
        let Some(value) = world.erased_storage(id).and_then(|s| s.get_any(entity)) else {
            continue;
        };
        match (hooks.serialize)(value) {
            Ok(json) => {
                components.insert(info.name.clone(), json);
            }
            Err(details) => {
                tracing::warn!(
                    %entity,
                    component = %info.name,
                    %details,
                    "component failed to serialize -- skipping in snapshot"
                );
            }
        }
    }
    components
}

impl Scene {
    pub fn snapshot(&self) -> SceneSnapshot {
        SceneSnapshot::capture(self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
