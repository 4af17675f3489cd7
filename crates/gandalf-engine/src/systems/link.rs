//! Scene-graph maintenance and world matrix propagation.

use gandalf_ecs::hierarchy::{live_parent, reconcile_parent};
use gandalf_ecs::prelude::*;
use glam::Mat4;

use crate::components::TransformComponent;

pub const LINK_SYSTEM_NAME: &str = "link";

/// Parent chains longer than this are assumed to be cycles.
pub const MAX_LINK_DEPTH: usize = 256;

/// Keeps `children` in sync with `parent` and composes world matrices.
///
/// Must be registered after the [`TransformSystem`](super::TransformSystem)
/// so local matrices are current when chains are walked.
pub struct LinkSystem {
    base: SystemBase,
}

impl LinkSystem {
    pub fn new() -> Self {
        Self {
            base: SystemBase::with_filter::<(LinkComponent, TransformComponent)>(LINK_SYSTEM_NAME),
        }
    }
}

impl Default for LinkSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// `root.local * ... * parent.local * local` for `entity`.
///
/// Ancestors without a transform contribute identity. Dead parents end the
/// chain.
pub fn compose_world_matrix(world: &World, entity: Entity) -> Mat4 {
    let local_of = |e: Entity| {
        world
            .get_component::<TransformComponent>(e)
            .map_or(Mat4::IDENTITY, |t| t.local_matrix)
    };
    let mut matrix = local_of(entity);
    let mut current = live_parent(world, entity);
    let mut depth = 0;
    while let Some(parent) = current {
        depth += 1;
        debug_assert!(depth < MAX_LINK_DEPTH, "parent chain of {entity} exceeds {MAX_LINK_DEPTH} links; cycle?");
        if depth >= MAX_LINK_DEPTH {
            tracing::error!(%entity, "parent chain too deep, truncating");
            break;
        }
        matrix = local_of(parent) * matrix;
        current = live_parent(world, parent);
    }
    matrix
}

impl System for LinkSystem {
    fn base(&self) -> &SystemBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut SystemBase {
        &mut self.base
    }

    fn on_update_entity(&mut self, world: &mut World, _ts: f32, entity: Entity) {
        reconcile_parent(world, entity);
        let world_matrix = compose_world_matrix(world, entity);
        if let Some(t) = world.get_component_mut::<TransformComponent>(entity) {
            t.world_matrix = world_matrix;
        }
    }
}
