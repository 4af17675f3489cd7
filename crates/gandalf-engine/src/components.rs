//! Engine component types.
//!
//! Authored fields serialize into scene snapshots; derived state (matrices,
//! resolved asset handles) is skipped and recomputed by the systems that own
//! it.

use std::rc::Rc;

use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::assets::material::MaterialInstance;
use crate::assets::mesh::{MeshData, MeshInstance};

// ---------------------------------------------------------------------------
// Transform
// ---------------------------------------------------------------------------

/// Position, orientation and scale of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformComponent {
    pub translation: Vec3,
    /// Euler angles in degrees, applied as `Rz * Ry * Rx`.
    pub rotation: Vec3,
    pub scale: Vec3,
    /// Static transforms are computed once, on creation.
    pub is_static: bool,

    #[serde(skip)]
    pub local_matrix: Mat4,
    /// `parent.world * local` for linked entities, `local` otherwise.
    #[serde(skip)]
    pub world_matrix: Mat4,
    #[serde(skip)]
    pub quaternion: Quat,
    /// Whether `local_matrix` changed during the last update.
    #[serde(skip)]
    pub dirty: bool,
}

impl Default for TransformComponent {
    fn default() -> Self {
        Self::new(Vec3::ZERO, Vec3::ZERO, Vec3::ONE)
    }
}

impl TransformComponent {
    pub fn new(translation: Vec3, rotation: Vec3, scale: Vec3) -> Self {
        Self {
            translation,
            rotation,
            scale,
            is_static: false,
            local_matrix: Mat4::IDENTITY,
            world_matrix: Mat4::IDENTITY,
            quaternion: Quat::IDENTITY,
            dirty: true,
        }
    }

    pub fn from_translation(translation: Vec3) -> Self {
        Self::new(translation, Vec3::ZERO, Vec3::ONE)
    }

    pub fn with_static(mut self, is_static: bool) -> Self {
        self.is_static = is_static;
        self
    }

    pub fn world_position(&self) -> Vec3 {
        self.world_matrix.w_axis.truncate()
    }
}

// ---------------------------------------------------------------------------
// Camera / Light
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Projection {
    Perspective,
    /// `height` is the vertical extent of the view volume in world units.
    Orthographic { height: f32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraComponent {
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    pub aspect: f32,
    pub projection: Projection,
    /// The renderer uses the first primary camera it finds.
    pub primary: bool,

    #[serde(skip)]
    pub view: Mat4,
    #[serde(skip)]
    pub projection_matrix: Mat4,
}

impl Default for CameraComponent {
    fn default() -> Self {
        Self::perspective(45.0, 16.0 / 9.0, 0.1, 1000.0)
    }
}

impl CameraComponent {
    pub fn perspective(fov: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            fov,
            near,
            far,
            aspect,
            projection: Projection::Perspective,
            primary: true,
            view: Mat4::IDENTITY,
            projection_matrix: Mat4::IDENTITY,
        }
    }

    pub fn orthographic(height: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            projection: Projection::Orthographic { height },
            ..Self::perspective(45.0, aspect, near, far)
        }
    }

    /// Right-handed projection with a `[0, 1]` depth range.
    pub fn compute_projection(&self) -> Mat4 {
        match self.projection {
            Projection::Perspective => {
                Mat4::perspective_rh(self.fov.to_radians(), self.aspect, self.near, self.far)
            }
            Projection::Orthographic { height } => {
                let half_h = height * 0.5;
                let half_w = half_h * self.aspect;
                Mat4::orthographic_rh(-half_w, half_w, -half_h, half_h, self.near, self.far)
            }
        }
    }
}

/// Point light. The first light in the scene also casts the shadow map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightComponent {
    pub color: Vec3,
    pub intensity: f32,
}

impl Default for LightComponent {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            intensity: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Material / StaticMesh
// ---------------------------------------------------------------------------

/// Names a material in the [`MaterialLib`](crate::assets::material::MaterialLib).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaterialComponent {
    pub name: String,
    /// Resolved by the rendering system when the entity is created.
    #[serde(skip)]
    pub instance: Option<Rc<MaterialInstance>>,
}

impl MaterialComponent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MeshSource {
    /// A mesh already in the [`MeshLib`](crate::assets::mesh::MeshLib).
    Named(String),
    /// Geometry registered into the library under `name` on creation.
    Inline { name: String, data: MeshData },
}

impl MeshSource {
    pub fn name(&self) -> &str {
        match self {
            MeshSource::Named(name) | MeshSource::Inline { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticMeshComponent {
    pub source: MeshSource,
    #[serde(skip)]
    pub instance: Option<Rc<MeshInstance>>,
}

impl StaticMeshComponent {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            source: MeshSource::Named(name.into()),
            instance: None,
        }
    }

    pub fn inline(name: impl Into<String>, data: MeshData) -> Self {
        Self {
            source: MeshSource::Inline {
                name: name.into(),
                data,
            },
            instance: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Compute
// ---------------------------------------------------------------------------

/// A compute job: `shader` is run over `input` and the read-back lands in
/// `output`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeComponent {
    /// Shader name in the [`ShaderLib`](crate::assets::shader::ShaderLib).
    pub shader: String,
    pub input: Vec<f32>,
    pub workgroups: [u32; 3],
    /// Dispatch every frame instead of once.
    pub repeat: bool,

    #[serde(skip)]
    pub output: Vec<f32>,
    #[serde(skip)]
    pub dispatches: u32,
}

impl ComputeComponent {
    pub fn new(shader: impl Into<String>, input: Vec<f32>, workgroups: [u32; 3]) -> Self {
        Self {
            shader: shader.into(),
            input,
            workgroups,
            repeat: false,
            output: Vec::new(),
            dispatches: 0,
        }
    }
}

/// Register every serializable engine component with the scene's world so
/// they appear in snapshots.
pub fn register_components(world: &mut gandalf_ecs::world::World) {
    world.register_component::<TransformComponent>("Transform");
    world.register_component::<CameraComponent>("Camera");
    world.register_component::<LightComponent>("Light");
    world.register_component::<MaterialComponent>("Material");
    world.register_component::<StaticMeshComponent>("StaticMesh");
    world.register_component::<ComputeComponent>("Compute");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_state_is_not_serialized() {
        let mut t = TransformComponent::from_translation(Vec3::new(1.0, 2.0, 3.0));
        t.world_matrix = Mat4::from_scale(Vec3::splat(9.0));
        let json = serde_json::to_value(&t).unwrap();
        assert!(json.get("world_matrix").is_none());
        let back: TransformComponent = serde_json::from_value(json).unwrap();
        assert_eq!(back.translation, t.translation);
        assert_eq!(back.world_matrix, Mat4::IDENTITY);
    }

    #[test]
    fn orthographic_projection_maps_extent_to_ndc() {
        let cam = CameraComponent::orthographic(4.0, 2.0, 0.1, 10.0);
        let p = cam.compute_projection();
        let corner = p.project_point3(Vec3::new(4.0, 2.0, -1.0));
        assert!((corner.x - 1.0).abs() < 1e-5);
        assert!((corner.y - 1.0).abs() < 1e-5);
    }
}
