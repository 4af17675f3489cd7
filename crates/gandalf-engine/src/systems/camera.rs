//! View and projection matrices for cameras.

use gandalf_ecs::prelude::*;

use crate::components::{CameraComponent, TransformComponent};

pub const CAMERA_SYSTEM_NAME: &str = "camera";

/// Runs after the link system: `view = world^-1`.
pub struct CameraSystem {
    base: SystemBase,
}

impl CameraSystem {
    pub fn new() -> Self {
        Self {
            base: SystemBase::with_filter::<(CameraComponent, TransformComponent)>(CAMERA_SYSTEM_NAME),
        }
    }
}

impl Default for CameraSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl System for CameraSystem {
    fn base(&self) -> &SystemBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut SystemBase {
        &mut self.base
    }

    fn on_update_entity(&mut self, world: &mut World, _ts: f32, entity: Entity) {
        let Some(world_matrix) = world
            .get_component::<TransformComponent>(entity)
            .map(|t| t.world_matrix)
        else {
            return;
        };
        if let Some(camera) = world.get_component_mut::<CameraComponent>(entity) {
            camera.view = world_matrix.inverse();
            camera.projection_matrix = camera.compute_projection();
        }
    }
}

/// The first primary camera in storage order, falling back to any camera.
pub fn active_camera(world: &World) -> Option<Entity> {
    world
        .find::<CameraComponent>(|c| c.primary)
        .or_else(|| world.iter::<CameraComponent>().map(|(e, _)| e).next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::systems::{LinkSystem, TransformSystem};
    use glam::Vec3;

    #[test]
    fn view_is_inverse_of_world() {
        let mut scene = Scene::new("cam");
        scene.register_system(TransformSystem::new());
        scene.register_system(LinkSystem::new());
        scene.register_system(CameraSystem::new());

        let cam = scene.enroll_entity();
        scene.add_component(cam, TransformComponent::from_translation(Vec3::new(0.0, 0.0, 5.0)));
        scene.add_component(cam, CameraComponent::default());
        scene.on_update(0.0);

        let camera = scene.get_component::<CameraComponent>(cam).unwrap();
        let origin_in_view = camera.view.transform_point3(Vec3::ZERO);
        assert!((origin_in_view - Vec3::new(0.0, 0.0, -5.0)).length() < 1e-5);
        assert_eq!(active_camera(scene.world()), Some(cam));
    }
}
