//! Built-in systems.
//!
//! Registration order matters: transform, then link, then camera, then the
//! renderer, so each reads matrices computed earlier in the same frame.

pub mod camera;
pub mod compute;
pub mod link;
pub mod transform;

pub use camera::CameraSystem;
pub use compute::ComputeSystem;
pub use link::LinkSystem;
pub use transform::TransformSystem;

use gandalf_ecs::scene::Scene;

/// Register the transform, link and camera systems in dependency order.
pub fn register_scene_graph(scene: &mut Scene) {
    scene.register_system(TransformSystem::new());
    scene.register_system(LinkSystem::new());
    scene.register_system(CameraSystem::new());
}
