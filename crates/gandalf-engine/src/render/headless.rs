//! A device that records commands instead of talking to a GPU.
//!
//! Used by tests and by headless runs. Every call is appended to a command
//! log; resource preparation is tracked so repeated uploads show up as
//! absent rather than duplicated.

use std::collections::{HashMap, HashSet};

use glam::Mat4;

use crate::assets::material::{MaterialId, MaterialInstance};
use crate::assets::mesh::MeshInstance;
use crate::config::Backend;
use crate::error::RenderError;
use crate::render::device::{ComputeDevice, ComputeJob, DrawCall, PassKind, RenderDevice};
use crate::render::uniforms::FrameUniforms;

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    UploadMesh { mesh: String, hash: String },
    PrepareMaterial { material: String, id: MaterialId },
    PrepareShadowPipeline { mesh_hash: String },
    BeginFrame { lights: usize, shadows: bool },
    BeginPass(PassKind),
    PushInstances { first: u32, count: u32 },
    Draw {
        material: Option<MaterialId>,
        mesh_hash: String,
        first_instance: u32,
        instance_count: u32,
        instanced: bool,
    },
    EndPass,
    EndFrame,
    Dispatch { shader: String, workgroups: [u32; 3] },
}

type Kernel = Box<dyn Fn(&[f32]) -> Vec<f32>>;

#[derive(Default)]
pub struct HeadlessDevice {
    commands: Vec<DeviceCommand>,
    meshes: HashSet<String>,
    materials: HashSet<MaterialId>,
    shadow_pipelines: HashSet<String>,
    instances: Vec<Mat4>,
    pass: Option<PassKind>,
    frames: u64,
    kernels: HashMap<String, Kernel>,
}

impl std::fmt::Debug for HeadlessDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessDevice")
            .field("commands", &self.commands.len())
            .field("meshes", &self.meshes.len())
            .field("materials", &self.materials.len())
            .field("frames", &self.frames)
            .finish()
    }
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a CPU stand-in for the compute shader named `shader`.
    pub fn with_kernel(mut self, shader: &str, kernel: impl Fn(&[f32]) -> Vec<f32> + 'static) -> Self {
        self.kernels.insert(shader.to_owned(), Box::new(kernel));
        self
    }

    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<DeviceCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Draw commands of the recorded log, in order.
    pub fn draws(&self) -> impl Iterator<Item = &DeviceCommand> {
        self.commands
            .iter()
            .filter(|c| matches!(c, DeviceCommand::Draw { .. }))
    }

    /// Model matrices pushed since the last `begin_frame`.
    pub fn instance_data(&self) -> &[Mat4] {
        &self.instances
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn uploaded_mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn prepared_material_count(&self) -> usize {
        self.materials.len()
    }
}

impl RenderDevice for HeadlessDevice {
    const BACKEND: Backend = Backend::Headless;
    const MAX_LIGHTS: usize = 4;

    fn upload_mesh(&mut self, mesh: &MeshInstance) {
        if self.meshes.insert(mesh.hash.clone()) {
            self.commands.push(DeviceCommand::UploadMesh {
                mesh: mesh.name.clone(),
                hash: mesh.hash.clone(),
            });
        }
    }

    fn prepare_material(&mut self, material: &MaterialInstance) {
        if self.materials.insert(material.id) {
            self.commands.push(DeviceCommand::PrepareMaterial {
                material: material.name.clone(),
                id: material.id,
            });
        }
    }

    fn prepare_shadow_pipeline(&mut self, mesh: &MeshInstance) {
        if self.shadow_pipelines.insert(mesh.hash.clone()) {
            self.commands.push(DeviceCommand::PrepareShadowPipeline {
                mesh_hash: mesh.hash.clone(),
            });
        }
    }

    fn begin_frame(&mut self, frame: &FrameUniforms) {
        self.instances.clear();
        self.commands.push(DeviceCommand::BeginFrame {
            lights: frame.lights.len(),
            shadows: frame.shadows_enabled,
        });
    }

    fn begin_pass(&mut self, pass: PassKind) {
        debug_assert!(self.pass.is_none(), "pass {pass:?} begun inside another pass");
        self.pass = Some(pass);
        self.commands.push(DeviceCommand::BeginPass(pass));
    }

    fn push_instances(&mut self, models: &[Mat4]) -> u32 {
        let first = self.instances.len() as u32;
        self.instances.extend_from_slice(models);
        self.commands.push(DeviceCommand::PushInstances {
            first,
            count: models.len() as u32,
        });
        first
    }

    fn draw(&mut self, call: &DrawCall<'_>) {
        if !self.meshes.contains(&call.mesh.hash) {
            tracing::warn!(mesh = %call.mesh.name, "draw with a mesh that was never uploaded");
        }
        self.commands.push(DeviceCommand::Draw {
            material: call.material.map(|m| m.id),
            mesh_hash: call.mesh.hash.clone(),
            first_instance: call.first_instance,
            instance_count: call.instance_count,
            instanced: call.instanced(),
        });
    }

    fn end_pass(&mut self) {
        self.pass = None;
        self.commands.push(DeviceCommand::EndPass);
    }

    fn end_frame(&mut self) {
        self.frames += 1;
        self.commands.push(DeviceCommand::EndFrame);
    }
}

impl ComputeDevice for HeadlessDevice {
    fn dispatch(&mut self, job: &ComputeJob<'_>) -> Result<Vec<f32>, RenderError> {
        job.check()?;
        self.commands.push(DeviceCommand::Dispatch {
            shader: job.shader.name.clone(),
            workgroups: job.workgroups,
        });
        match self.kernels.get(&job.shader.name) {
            Some(kernel) => Ok(kernel(job.input)),
            None => Err(RenderError::Readback(format!(
                "no kernel registered for '{}'",
                job.shader.name
            ))),
        }
    }
}
