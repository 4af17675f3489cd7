//! Local matrix composition.

use gandalf_ecs::prelude::*;
use glam::{EulerRot, Mat4, Quat};

use crate::components::TransformComponent;

pub const TRANSFORM_SYSTEM_NAME: &str = "transform";

/// Computes `local = T * R * S` for every transform and seeds
/// `world = local`. The link system overwrites `world` for linked entities.
pub struct TransformSystem {
    base: SystemBase,
}

impl TransformSystem {
    pub fn new() -> Self {
        Self {
            base: SystemBase::with_filter::<(TransformComponent,)>(TRANSFORM_SYSTEM_NAME),
        }
    }
}

impl Default for TransformSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Quaternion for Euler angles in degrees, `Rz * Ry * Rx`.
pub fn quat_from_euler_degrees(rotation: glam::Vec3) -> Quat {
    Quat::from_euler(
        EulerRot::ZYX,
        rotation.z.to_radians(),
        rotation.y.to_radians(),
        rotation.x.to_radians(),
    )
}

fn recompute(t: &mut TransformComponent) {
    t.quaternion = quat_from_euler_degrees(t.rotation);
    let local = Mat4::from_scale_rotation_translation(t.scale, t.quaternion, t.translation);
    t.dirty = local != t.local_matrix;
    t.local_matrix = local;
    t.world_matrix = local;
}

impl System for TransformSystem {
    fn base(&self) -> &SystemBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut SystemBase {
        &mut self.base
    }

    fn on_create_entity(&mut self, world: &mut World, entity: Entity) {
        if let Some(t) = world.get_component_mut::<TransformComponent>(entity) {
            if t.is_static {
                recompute(t);
                t.dirty = false;
            }
        }
    }

    fn on_update_entity(&mut self, world: &mut World, _ts: f32, entity: Entity) {
        let Some(t) = world.get_component_mut::<TransformComponent>(entity) else {
            return;
        };
        if t.is_static {
            t.dirty = false;
            return;
        }
        recompute(t);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn scene_with(t: TransformComponent) -> (Scene, Entity) {
        let mut scene = Scene::new("t");
        scene.register_system(TransformSystem::new());
        let e = scene.enroll_entity();
        scene.add_component(e, t);
        (scene, e)
    }

    #[test]
    fn composes_translation_rotation_scale() {
        let t = TransformComponent::new(
            Vec3::new(1.0, 2.0, 3.0),
            Vec3::new(0.0, 0.0, 90.0),
            Vec3::splat(2.0),
        );
        let (mut scene, e) = scene_with(t);
        scene.on_update(0.016);

        let t = scene.get_component::<TransformComponent>(e).unwrap();
        let x = t.local_matrix.transform_point3(Vec3::X);
        assert!((x - Vec3::new(1.0, 4.0, 3.0)).length() < 1e-5);
        assert_eq!(t.world_matrix, t.local_matrix);
    }

    #[test]
    fn euler_order_is_z_then_y_then_x() {
        let q = quat_from_euler_degrees(Vec3::new(90.0, 90.0, 0.0));
        let expected = Quat::from_rotation_y(90f32.to_radians()) * Quat::from_rotation_x(90f32.to_radians());
        assert!(q.abs_diff_eq(expected, 1e-6));
    }

    #[test]
    fn dirty_tracks_changes_between_frames() {
        let (mut scene, e) = scene_with(TransformComponent::default());
        scene.on_update(0.0);
        scene.on_update(0.0);
        assert!(!scene.get_component::<TransformComponent>(e).unwrap().dirty);

        scene.get_component_mut::<TransformComponent>(e).unwrap().translation.x = 5.0;
        scene.on_update(0.0);
        assert!(scene.get_component::<TransformComponent>(e).unwrap().dirty);
    }

    #[test]
    fn static_transform_is_computed_once() {
        let t = TransformComponent::from_translation(Vec3::X).with_static(true);
        let (mut scene, e) = scene_with(t);
        scene.on_update(0.0);
        scene.get_component_mut::<TransformComponent>(e).unwrap().translation = Vec3::Y;
        scene.on_update(0.0);

        let t = scene.get_component::<TransformComponent>(e).unwrap();
        assert_eq!(t.world_position(), Vec3::X);
        assert!(!t.dirty);
    }
}
