//! The static mesh rendering system.

use std::cell::RefCell;
use std::rc::Rc;

use gandalf_ecs::prelude::*;

use crate::assets::Assets;
use crate::components::{MaterialComponent, MeshSource, StaticMeshComponent, TransformComponent};
use crate::config::EngineConfig;
use crate::render::batch::{build_frame_plan, FramePlan};
use crate::render::device::{DrawCall, PassKind, RenderDevice};

pub const RENDER_SYSTEM_NAME: &str = "static_mesh_rendering";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSettings {
    pub shadows: bool,
    pub clear_color: [f32; 4],
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            shadows: true,
            clear_color: [0.1, 0.1, 0.1, 1.0],
        }
    }
}

impl From<&EngineConfig> for RenderSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            shadows: config.shadows,
            clear_color: config.clear_color,
        }
    }
}

/// Counters for the last rendered frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub draws: usize,
    pub shadow_draws: usize,
    pub instances: usize,
    pub lights: usize,
}

/// A device plus the asset libraries it draws from.
#[derive(Debug)]
pub struct Renderer<D: RenderDevice> {
    pub device: D,
    pub assets: Assets,
    pub settings: RenderSettings,
    last_stats: FrameStats,
}

pub type SharedRenderer<D> = Rc<RefCell<Renderer<D>>>;

impl<D: RenderDevice> Renderer<D> {
    pub fn new(device: D, assets: Assets, settings: RenderSettings) -> Self {
        if assets.backend != D::BACKEND {
            tracing::warn!(
                assets = ?assets.backend,
                device = ?D::BACKEND,
                "asset libraries were built for a different backend"
            );
        }
        Self {
            device,
            assets,
            settings,
            last_stats: FrameStats::default(),
        }
    }

    pub fn shared(self) -> SharedRenderer<D> {
        Rc::new(RefCell::new(self))
    }

    pub fn last_stats(&self) -> FrameStats {
        self.last_stats
    }

    /// Resolve `entity`'s material and mesh names and create their device
    /// resources. Returns whether both resolved.
    pub fn prepare_entity(&mut self, world: &mut World, entity: Entity) -> bool {
        let material = match world.get_component::<MaterialComponent>(entity) {
            Some(m) => m.instance.clone().or_else(|| self.assets.materials.get(&m.name)),
            None => None,
        };
        let mesh = match world.get_component::<StaticMeshComponent>(entity).map(|m| &m.source) {
            Some(MeshSource::Named(name)) => self.assets.meshes.get(name),
            Some(MeshSource::Inline { name, data }) => {
                match self.assets.meshes.build(name, data.clone()) {
                    Ok(mesh) => Some(mesh),
                    Err(err) => {
                        tracing::warn!(%entity, %err, "inline mesh rejected");
                        None
                    }
                }
            }
            None => None,
        };

        if let Some(material) = &material {
            self.device.prepare_material(material);
        }
        if let Some(mesh) = &mesh {
            self.device.upload_mesh(mesh);
            let casts = material.as_ref().is_some_and(|m| m.descriptor.cast_shadows);
            if self.settings.shadows && casts {
                self.device.prepare_shadow_pipeline(mesh);
            }
        }

        let resolved = material.is_some() && mesh.is_some();
        if let Some(component) = world.get_component_mut::<MaterialComponent>(entity) {
            component.instance = material;
        }
        if let Some(component) = world.get_component_mut::<StaticMeshComponent>(entity) {
            component.instance = mesh;
        }
        if !resolved {
            tracing::warn!(%entity, "renderable entity has unresolved assets and will not draw");
        }
        resolved
    }

    /// Submit `plan`: shadow pass (if any), then the base pass.
    pub fn render(&mut self, plan: &FramePlan) -> FrameStats {
        let mut stats = FrameStats {
            lights: plan.frame.lights.len(),
            ..FrameStats::default()
        };
        let device = &mut self.device;
        device.begin_frame(&plan.frame);

        if !plan.shadow.is_empty() {
            device.begin_pass(PassKind::Shadow);
            for batch in &plan.shadow {
                let first_instance = device.push_instances(&batch.models);
                device.draw(&DrawCall {
                    material: None,
                    mesh: &batch.mesh,
                    first_instance,
                    instance_count: batch.len() as u32,
                });
                stats.shadow_draws += 1;
            }
            device.end_pass();
        }

        device.begin_pass(PassKind::Base);
        for material_batch in &plan.materials {
            for batch in &material_batch.meshes {
                let first_instance = device.push_instances(&batch.models);
                device.draw(&DrawCall {
                    material: Some(material_batch.material.as_ref()),
                    mesh: &batch.mesh,
                    first_instance,
                    instance_count: batch.len() as u32,
                });
                stats.draws += 1;
                stats.instances += batch.len();
            }
        }
        device.end_pass();
        device.end_frame();

        self.last_stats = stats;
        stats
    }
}

// ---------------------------------------------------------------------------
// StaticMeshRenderingSystem
// ---------------------------------------------------------------------------

/// Draws every entity with transform, material and static mesh.
pub struct StaticMeshRenderingSystem<D: RenderDevice> {
    base: SystemBase,
    renderer: SharedRenderer<D>,
}

impl<D: RenderDevice> StaticMeshRenderingSystem<D> {
    pub fn new(renderer: SharedRenderer<D>) -> Self {
        Self {
            base: SystemBase::with_filter::<(TransformComponent, MaterialComponent, StaticMeshComponent)>(
                RENDER_SYSTEM_NAME,
            ),
            renderer,
        }
    }

    pub fn renderer(&self) -> &SharedRenderer<D> {
        &self.renderer
    }
}

impl<D: RenderDevice + 'static> System for StaticMeshRenderingSystem<D> {
    fn base(&self) -> &SystemBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut SystemBase {
        &mut self.base
    }

    fn on_create_system(&mut self, _world: &mut World) {
        tracing::info!(backend = ?D::BACKEND, max_lights = D::MAX_LIGHTS, "renderer started");
    }

    fn on_create_entity(&mut self, world: &mut World, entity: Entity) {
        self.renderer.borrow_mut().prepare_entity(world, entity);
    }

    fn on_update_system(&mut self, world: &mut World, _ts: f32) {
        let mut renderer = self.renderer.borrow_mut();
        let plan = build_frame_plan(world, self.base.entities(), D::MAX_LIGHTS, renderer.settings.shadows);
        let stats = renderer.render(&plan);
        tracing::trace!(draws = stats.draws, instances = stats.instances, "frame rendered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::material::MaterialData;
    use crate::assets::mesh::primitives;
    use crate::assets::shader::builtin;
    use crate::config::Backend;
    use crate::render::headless::{DeviceCommand, HeadlessDevice};
    use glam::Vec3;

    fn renderer() -> SharedRenderer<HeadlessDevice> {
        let mut assets = Assets::new(Backend::Headless);
        assets.build_material("m", MaterialData::new(builtin::UNLIT), None);
        Renderer::new(
            HeadlessDevice::new(),
            assets,
            RenderSettings {
                shadows: false,
                ..Default::default()
            },
        )
        .shared()
    }

    #[test]
    fn resources_are_prepared_once_on_create() {
        let renderer = renderer();
        let mut scene = Scene::new("r");
        scene.register_system(StaticMeshRenderingSystem::new(renderer.clone()));
        for x in 0..3 {
            let e = scene.enroll_entity();
            scene.add_component(e, TransformComponent::from_translation(Vec3::X * x as f32));
            scene.add_component(e, MaterialComponent::new("m"));
            scene.add_component(e, StaticMeshComponent::named(primitives::CUBE));
        }
        scene.on_update(0.0);
        scene.on_update(0.0);

        let r = renderer.borrow();
        assert_eq!(r.device.uploaded_mesh_count(), 1);
        assert_eq!(r.device.prepared_material_count(), 1);
        let uploads = r
            .device
            .commands()
            .iter()
            .filter(|c| matches!(c, DeviceCommand::UploadMesh { .. }))
            .count();
        assert_eq!(uploads, 1);
        assert_eq!(r.device.frames(), 2);
        assert_eq!(r.last_stats().instances, 3);
    }

    #[test]
    fn inline_mesh_is_registered_on_create() {
        let renderer = renderer();
        let mut scene = Scene::new("r");
        scene.register_system(StaticMeshRenderingSystem::new(renderer.clone()));
        let e = scene.enroll_entity();
        scene.add_component(e, TransformComponent::default());
        scene.add_component(e, MaterialComponent::new("m"));
        scene.add_component(e, StaticMeshComponent::inline("tri", primitives::quad()));
        scene.on_update(0.0);

        assert!(renderer.borrow().assets.meshes.contains("tri"));
        assert!(scene.get_component::<StaticMeshComponent>(e).unwrap().instance.is_some());
    }
}
