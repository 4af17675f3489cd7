//! Frame planning.
//!
//! [`build_frame_plan`] reads the world and groups renderable entities by
//! material instance, then by mesh content hash. It touches no device, so
//! the grouping is testable without a GPU.

use std::rc::Rc;

use gandalf_ecs::prelude::*;
use glam::{Mat4, Vec3};

use crate::assets::material::{MaterialId, MaterialInstance};
use crate::assets::mesh::MeshInstance;
use crate::components::{
    CameraComponent, LightComponent, MaterialComponent, StaticMeshComponent, TransformComponent,
};
use crate::render::uniforms::{light_view_projection, FrameUniforms, LightUniform};
use crate::systems::camera::active_camera;

/// Model matrices one mesh batch may carry.
pub const MAX_INSTANCES_PER_BATCH: usize = 512;

/// Entities sharing a mesh (by content hash) within one material or pass.
#[derive(Debug, Clone)]
pub struct MeshBatch {
    pub mesh: Rc<MeshInstance>,
    pub entities: Vec<Entity>,
    pub models: Vec<Mat4>,
}

impl MeshBatch {
    fn new(mesh: Rc<MeshInstance>) -> Self {
        Self {
            mesh,
            entities: Vec::new(),
            models: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct MaterialBatch {
    pub material: Rc<MaterialInstance>,
    pub meshes: Vec<MeshBatch>,
}

impl MaterialBatch {
    pub fn instance_count(&self) -> usize {
        self.meshes.iter().map(MeshBatch::len).sum()
    }
}

/// Everything the device needs for one frame, in submission order.
#[derive(Debug, Clone, Default)]
pub struct FramePlan {
    pub frame: FrameUniforms,
    pub materials: Vec<MaterialBatch>,
    /// Shadow pre-pass batches; empty when shadows are off or no light
    /// exists.
    pub shadow: Vec<MeshBatch>,
}

impl FramePlan {
    pub fn base_draw_count(&self) -> usize {
        self.materials.iter().map(|m| m.meshes.len()).sum()
    }

    pub fn instance_count(&self) -> usize {
        self.materials.iter().map(MaterialBatch::instance_count).sum()
    }

    pub fn material(&self, id: MaterialId) -> Option<&MaterialBatch> {
        self.materials.iter().find(|m| m.material.id == id)
    }
}

fn push_into(batches: &mut Vec<MeshBatch>, mesh: &Rc<MeshInstance>, entity: Entity, model: Mat4) {
    let index = match batches.iter().position(|b| b.mesh.hash == mesh.hash) {
        Some(i) => i,
        None => {
            batches.push(MeshBatch::new(mesh.clone()));
            batches.len() - 1
        }
    };
    let batch = &mut batches[index];
    batch.entities.push(entity);
    batch.models.push(model);
}

/// Collect the frame's lights, in storage order.
///
/// Panics when there are more than `max_lights`.
pub fn collect_lights(world: &World, max_lights: usize) -> Vec<LightUniform> {
    let lights: Vec<LightUniform> = world
        .iter::<LightComponent>()
        .map(|(entity, light)| LightUniform {
            position: world
                .get_component::<TransformComponent>(entity)
                .map_or(Vec3::ZERO, TransformComponent::world_position),
            intensity: light.intensity,
            color: light.color,
        })
        .collect();
    assert!(
        lights.len() <= max_lights,
        "scene has {} lights, backend supports at most {max_lights}",
        lights.len()
    );
    lights
}

fn camera_uniforms(world: &World, frame: &mut FrameUniforms) {
    let Some(camera_entity) = active_camera(world) else {
        tracing::debug!("no camera in scene, rendering with identity view");
        return;
    };
    if let Some(camera) = world.get_component::<CameraComponent>(camera_entity) {
        frame.view = camera.view;
        frame.projection = camera.projection_matrix;
    }
    if let Some(t) = world.get_component::<TransformComponent>(camera_entity) {
        frame.camera_position = t.world_position();
    }
}

/// Group `entities` (the rendering system's cache) into a [`FramePlan`].
///
/// Entities whose material or mesh did not resolve are skipped. Panics when
/// the scene exceeds `max_lights` or a mesh batch exceeds
/// [`MAX_INSTANCES_PER_BATCH`].
pub fn build_frame_plan(
    world: &World,
    entities: &[Entity],
    max_lights: usize,
    shadows: bool,
) -> FramePlan {
    let mut frame = FrameUniforms::default();
    camera_uniforms(world, &mut frame);
    frame.lights = collect_lights(world, max_lights);
    let shadow_pass = shadows && !frame.lights.is_empty();
    if let Some(first) = frame.lights.first().filter(|_| shadow_pass) {
        frame.light_space = light_view_projection(first.position);
        frame.shadows_enabled = true;
    }

    let mut materials: Vec<MaterialBatch> = Vec::new();
    let mut shadow: Vec<MeshBatch> = Vec::new();
    for &entity in entities {
        let Some(material) = world
            .get_component::<MaterialComponent>(entity)
            .and_then(|m| m.instance.clone())
        else {
            continue;
        };
        let Some(mesh) = world
            .get_component::<StaticMeshComponent>(entity)
            .and_then(|m| m.instance.clone())
        else {
            continue;
        };
        let model = world
            .get_component::<TransformComponent>(entity)
            .map_or(Mat4::IDENTITY, |t| t.world_matrix);

        if shadow_pass && material.descriptor.cast_shadows {
            push_into(&mut shadow, &mesh, entity, model);
        }

        let index = match materials.iter().position(|b| b.material.id == material.id) {
            Some(i) => i,
            None => {
                materials.push(MaterialBatch {
                    material: material.clone(),
                    meshes: Vec::new(),
                });
                materials.len() - 1
            }
        };
        push_into(&mut materials[index].meshes, &mesh, entity, model);
    }

    for batch in materials.iter().flat_map(|m| &m.meshes).chain(&shadow) {
        assert!(
            batch.len() <= MAX_INSTANCES_PER_BATCH,
            "mesh '{}' has {} instances in one batch, limit is {MAX_INSTANCES_PER_BATCH}",
            batch.mesh.name,
            batch.len()
        );
    }

    FramePlan {
        frame,
        materials,
        shadow,
    }
}
