//! Rendering: frame planning, the device seam and its backends.
//!
//! The headless device is always built. `opengl` and `webgpu` enable the GPU
//! backends.

pub mod batch;
pub mod device;
pub mod headless;
pub mod system;
pub mod uniforms;

#[cfg(feature = "opengl")]
pub mod gl;
#[cfg(feature = "webgpu")]
pub mod wgpu;

pub use batch::{build_frame_plan, FramePlan, MaterialBatch, MeshBatch, MAX_INSTANCES_PER_BATCH};
pub use device::{ComputeDevice, ComputeJob, DrawCall, PassKind, RenderDevice};
pub use headless::{DeviceCommand, HeadlessDevice};
pub use system::{FrameStats, RenderSettings, Renderer, SharedRenderer, StaticMeshRenderingSystem};
pub use uniforms::{FrameUniforms, LightUniform};
