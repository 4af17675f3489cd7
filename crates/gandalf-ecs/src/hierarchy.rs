//! Parent/child links between entities.
//!
//! Links are plain [`Entity`] handles resolved through the [`World`]; a child
//! never keeps its parent alive. The `children` list is a mirror of every
//! other entity's `parent` field and is reconciled lazily, once per frame, by
//! the link system in `gandalf-engine`.

use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::world::World;

/// Scene-graph link of an entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkComponent {
    pub parent: Option<Entity>,
    /// Parent observed at the last reconciliation.
    pub prev_parent: Option<Entity>,
    pub children: Vec<Entity>,
}

impl LinkComponent {
    pub fn new(parent: Option<Entity>) -> Self {
        Self {
            parent,
            prev_parent: None,
            children: Vec::new(),
        }
    }

    /// Whether `parent` changed since the last reconciliation.
    pub fn needs_relink(&self) -> bool {
        self.parent != self.prev_parent
    }
}

/// Resolve `entity`'s parent, treating a destroyed parent as no parent.
pub fn live_parent(world: &World, entity: Entity) -> Option<Entity> {
    let parent = world.get_component::<LinkComponent>(entity)?.parent?;
    if world.is_alive(parent) {
        Some(parent)
    } else {
        tracing::warn!(%entity, %parent, "link points at a destroyed parent");
        None
    }
}

/// Apply the reparent protocol for `entity` if its parent changed.
///
/// Removes it from the previous parent's `children`, appends it to the new
/// parent's `children` and records the new parent as seen. Returns whether
/// anything changed.
pub fn reconcile_parent(world: &mut World, entity: Entity) -> bool {
    let Some(link) = world.get_component::<LinkComponent>(entity) else {
        return false;
    };
    if !link.needs_relink() {
        return false;
    }
    let (old, new) = (link.prev_parent, link.parent);

    if let Some(old) = old {
        if let Some(old_link) = world.get_component_mut::<LinkComponent>(old) {
            old_link.children.retain(|c| *c != entity);
        }
    }
    if let Some(new) = new {
        match world.get_component_mut::<LinkComponent>(new) {
            Some(new_link) => {
                if !new_link.children.contains(&entity) {
                    new_link.children.push(entity);
                }
            }
            None => {
                tracing::warn!(%entity, parent = %new, "parent has no LinkComponent");
            }
        }
    }
    if let Some(link) = world.get_component_mut::<LinkComponent>(entity) {
        link.prev_parent = new;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reparent_moves_between_children_lists() {
        let mut world = World::new();
        let a = world.spawn();
        let b = world.spawn();
        let child = world.spawn();
        world.add_component(a, LinkComponent::default());
        world.add_component(b, LinkComponent::default());
        world.add_component(child, LinkComponent::new(Some(a)));

        assert!(reconcile_parent(&mut world, child));
        assert_eq!(world.get_component::<LinkComponent>(a).unwrap().children, vec![child]);
        assert!(!reconcile_parent(&mut world, child));

        world.get_component_mut::<LinkComponent>(child).unwrap().parent = Some(b);
        assert!(reconcile_parent(&mut world, child));
        assert!(world.get_component::<LinkComponent>(a).unwrap().children.is_empty());
        assert_eq!(world.get_component::<LinkComponent>(b).unwrap().children, vec![child]);
    }

    #[test]
    fn dead_parent_resolves_to_none() {
        let mut world = World::new();
        let parent = world.spawn();
        let child = world.spawn();
        world.add_component(child, LinkComponent::new(Some(parent)));
        assert_eq!(live_parent(&world, child), Some(parent));
        world.despawn(parent);
        assert_eq!(live_parent(&world, child), None);
    }
}
