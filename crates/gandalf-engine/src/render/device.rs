//! The seam between frame planning and a graphics API.

use glam::Mat4;

use crate::assets::material::MaterialInstance;
use crate::assets::mesh::MeshInstance;
use crate::assets::shader::ShaderInstance;
use crate::config::Backend;
use crate::error::RenderError;
use crate::render::uniforms::FrameUniforms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    /// Depth-only pass from the shadow-casting light.
    Shadow,
    Base,
}

/// One draw of `instance_count` copies of `mesh`, whose model matrices start
/// at `first_instance` in the frame's instance buffer.
///
/// `material` is `None` in the shadow pass, which uses the depth-only
/// pipeline of the mesh.
#[derive(Debug, Clone, Copy)]
pub struct DrawCall<'a> {
    pub material: Option<&'a MaterialInstance>,
    pub mesh: &'a MeshInstance,
    pub first_instance: u32,
    pub instance_count: u32,
}

impl DrawCall<'_> {
    /// Whether the device should issue an instanced draw.
    pub fn instanced(&self) -> bool {
        self.instance_count > 1
    }
}

/// A graphics backend.
///
/// Resource preparation (`upload_mesh`, `prepare_*`) happens when entities
/// are created and must be idempotent. The per-frame calls only bind and
/// draw existing resources.
pub trait RenderDevice {
    const BACKEND: Backend;
    /// Lights the backend's shaders can consume in one frame.
    const MAX_LIGHTS: usize;

    fn upload_mesh(&mut self, mesh: &MeshInstance);
    fn prepare_material(&mut self, material: &MaterialInstance);
    /// Depth-only pipeline for `mesh`, keyed by its content hash.
    fn prepare_shadow_pipeline(&mut self, mesh: &MeshInstance);

    /// Upload the frame uniforms and reset the instance buffer.
    fn begin_frame(&mut self, frame: &FrameUniforms);
    fn begin_pass(&mut self, pass: PassKind);
    /// Append model matrices to the instance buffer. Returns the index of the
    /// first one.
    fn push_instances(&mut self, models: &[Mat4]) -> u32;
    fn draw(&mut self, call: &DrawCall<'_>);
    fn end_pass(&mut self);
    fn end_frame(&mut self);
}

/// A compute job over a single `f32` storage buffer.
///
/// The shader reads and writes `@group(0) @binding(0)`; its contents after
/// the dispatch are the job's output.
#[derive(Debug, Clone, Copy)]
pub struct ComputeJob<'a> {
    pub shader: &'a ShaderInstance,
    pub input: &'a [f32],
    pub workgroups: [u32; 3],
}

impl ComputeJob<'_> {
    /// Reject jobs no device can bind: an empty storage buffer is invalid.
    pub fn check(&self) -> Result<(), RenderError> {
        if self.input.is_empty() {
            return Err(RenderError::EmptyComputeInput(self.shader.name.clone()));
        }
        Ok(())
    }
}

pub trait ComputeDevice {
    /// Run `job` and block until its output has been read back.
    fn dispatch(&mut self, job: &ComputeJob<'_>) -> Result<Vec<f32>, RenderError>;
}
