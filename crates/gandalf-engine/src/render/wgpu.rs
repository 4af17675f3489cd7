//! WebGPU device (wgpu).
//!
//! Renders into an offscreen color target. Draws are recorded during the
//! passes and encoded in [`end_frame`](RenderDevice::end_frame), after the
//! frame uniforms and the instance storage buffer have been written.
//!
//! Bind group conventions of the WGSL templates:
//!
//! | group | contents |
//! |-------|----------|
//! | 0 | `camera`, `lights`, `shadow`, `shadow_map`, `shadow_sampler` |
//! | 1 | material block and textures, laid out from reflection |
//! | 2 | `instances: array<mat4x4<f32>>` storage buffer |

use std::collections::HashMap;
use std::sync::mpsc;

use glam::Mat4;
use wgpu::util::DeviceExt;

use crate::assets::layout::HostBlock;
use crate::assets::material::{
    BlendMode, CullMode, MaterialDescriptor, MaterialId, MaterialInstance, PrimitiveTopology, MATERIAL_GROUP,
};
use crate::assets::mesh::{MeshInstance, VERTEX_STRIDE_FLOATS};
use crate::assets::reflect::{reflect_wgsl, BindingKind, ShaderReflection, ShaderStage};
use crate::assets::shader::{builtin, ShaderInstance, ShaderSource};
use crate::assets::texture::{TextureFilter, TextureFormat, TextureInstance, TextureWrap};
use crate::config::Backend;
use crate::error::RenderError;
use crate::render::device::{ComputeDevice, ComputeJob, DrawCall, PassKind, RenderDevice};
use crate::render::uniforms::{FrameUniforms, CAMERA_BLOCK, LIGHTS_BLOCK, SHADOW_BLOCK};

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const MAT4_BYTES: u64 = std::mem::size_of::<Mat4>() as u64;
const MIN_INSTANCE_CAPACITY: u64 = 64;

/// `(block name, binding)` of the frame-level uniform blocks in group 0.
const FRAME_BLOCKS: [(&str, u32); 3] = [(CAMERA_BLOCK, 0), (LIGHTS_BLOCK, 1), (SHADOW_BLOCK, 2)];
const SHADOW_MAP_BINDING: u32 = 3;
const SHADOW_SAMPLER_BINDING: u32 = 4;

fn vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    const ATTRIBUTES: [wgpu::VertexAttribute; 3] = wgpu::vertex_attr_array![
        0 => Float32x3,
        1 => Float32x3,
        2 => Float32x2,
    ];
    wgpu::VertexBufferLayout {
        array_stride: (VERTEX_STRIDE_FLOATS * std::mem::size_of::<f32>()) as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &ATTRIBUTES,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Layout entry for a reflected binding.
fn reflected_entry(binding: u32, kind: BindingKind) -> wgpu::BindGroupLayoutEntry {
    let ty = match kind {
        BindingKind::UniformBuffer => return uniform_entry(binding),
        BindingKind::StorageBuffer { read_only } => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        BindingKind::Texture => wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        BindingKind::DepthTexture => wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Depth,
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        BindingKind::Sampler { comparison: false } => {
            wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering)
        }
        BindingKind::Sampler { comparison: true } => {
            wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison)
        }
    };
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
        ty,
        count: None,
    }
}

fn blend_state(blend: BlendMode) -> wgpu::BlendState {
    match blend {
        BlendMode::Opaque => wgpu::BlendState::REPLACE,
        BlendMode::Alpha => wgpu::BlendState::ALPHA_BLENDING,
        BlendMode::Additive => {
            let add = wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            };
            wgpu::BlendState { color: add, alpha: add }
        }
    }
}

fn primitive_state(descriptor: &MaterialDescriptor) -> wgpu::PrimitiveState {
    wgpu::PrimitiveState {
        topology: match descriptor.primitive {
            PrimitiveTopology::Triangles => wgpu::PrimitiveTopology::TriangleList,
            PrimitiveTopology::Lines => wgpu::PrimitiveTopology::LineList,
            PrimitiveTopology::Points => wgpu::PrimitiveTopology::PointList,
        },
        strip_index_format: None,
        front_face: wgpu::FrontFace::Ccw,
        cull_mode: match descriptor.cull {
            CullMode::Back => Some(wgpu::Face::Back),
            CullMode::Front => Some(wgpu::Face::Front),
            CullMode::None => None,
        },
        polygon_mode: wgpu::PolygonMode::Fill,
        unclipped_depth: false,
        conservative: false,
    }
}

// ---------------------------------------------------------------------------
// GPU-side resources
// ---------------------------------------------------------------------------

struct GpuMesh {
    vertices: wgpu::Buffer,
    indices: Option<wgpu::Buffer>,
    count: u32,
}

struct GpuMaterial {
    pipeline: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,
    /// Keeps the material uniform buffer alive.
    _uniforms: Option<wgpu::Buffer>,
}

struct GpuTexture {
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
}

struct FrameBlock {
    name: &'static str,
    block: HostBlock,
    buffer: wgpu::Buffer,
}

#[derive(Debug, Clone, Copy)]
struct RecordedDraw {
    pass: PassKind,
    material: Option<MaterialId>,
    first_instance: u32,
    instance_count: u32,
}

/// Draw plus the key of the mesh it uses.
type Recorded = (RecordedDraw, String);

// ---------------------------------------------------------------------------
// WgpuDevice
// ---------------------------------------------------------------------------

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    width: u32,
    height: u32,
    clear_color: wgpu::Color,

    color_target: wgpu::Texture,
    color_view: wgpu::TextureView,
    depth_view: wgpu::TextureView,
    shadow_view: wgpu::TextureView,

    frame_layout: wgpu::BindGroupLayout,
    shadow_frame_layout: wgpu::BindGroupLayout,
    empty_layout: wgpu::BindGroupLayout,
    instances_layout: wgpu::BindGroupLayout,
    frame_bind_group: wgpu::BindGroup,
    shadow_frame_bind_group: wgpu::BindGroup,
    empty_bind_group: wgpu::BindGroup,
    frame_blocks: Vec<FrameBlock>,

    instance_buffer: wgpu::Buffer,
    instance_capacity: u64,
    instances_bind_group: wgpu::BindGroup,
    instances: Vec<Mat4>,

    modules: HashMap<String, wgpu::ShaderModule>,
    meshes: HashMap<String, GpuMesh>,
    textures: HashMap<String, GpuTexture>,
    white: GpuTexture,
    materials: HashMap<MaterialId, GpuMaterial>,
    shadow_pipelines: HashMap<String, wgpu::RenderPipeline>,

    frame: FrameUniforms,
    pass: Option<PassKind>,
    recorded: Vec<Recorded>,
}

impl WgpuDevice {
    /// Create a device rendering into a `width` x `height` offscreen target.
    pub fn new_offscreen(
        width: u32,
        height: u32,
        clear_color: [f32; 4],
        shadow_map_size: u32,
    ) -> Result<Self, RenderError> {
        pollster::block_on(Self::create(width.max(1), height.max(1), clear_color, shadow_map_size.max(1)))
    }

    async fn create(
        width: u32,
        height: u32,
        clear_color: [f32; 4],
        shadow_map_size: u32,
    ) -> Result<Self, RenderError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(RenderError::NoAdapter)?;
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("gandalf_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(|err| RenderError::Device(err.to_string()))?;
        device.on_uncaptured_error(Box::new(|err| {
            tracing::error!(%err, "uncaptured GPU error");
        }));
        tracing::info!(adapter = ?adapter.get_info().name, width, height, "WebGPU device created");

        let target = |label, format, w, h, usage| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width: w,
                    height: h,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats: &[],
            })
        };
        let color_target = target(
            "color_target",
            COLOR_FORMAT,
            width,
            height,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        );
        let color_view = color_target.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = target(
            "depth_target",
            DEPTH_FORMAT,
            width,
            height,
            wgpu::TextureUsages::RENDER_ATTACHMENT,
        )
        .create_view(&wgpu::TextureViewDescriptor::default());
        let shadow_view = target(
            "shadow_map",
            DEPTH_FORMAT,
            shadow_map_size,
            shadow_map_size,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        )
        .create_view(&wgpu::TextureViewDescriptor::default());
        let shadow_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("shadow_sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        });

        // Frame block layouts come from the reflected Blinn-Phong template,
        // which declares all three.
        let reference = match builtin::source(builtin::BLINN_PHONG, Backend::WebGpu) {
            Some(ShaderSource::Wgsl(source)) => reflect_wgsl(&source),
            _ => ShaderReflection::default(),
        };
        let mut frame_blocks = Vec::new();
        for (name, _) in FRAME_BLOCKS {
            let Some(layout) = reference.binding(name).and_then(|b| b.layout.clone()) else {
                return Err(RenderError::Device(format!("frame block '{name}' missing from reflection")));
            };
            let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(name),
                size: u64::from(layout.size),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            frame_blocks.push(FrameBlock {
                name,
                block: HostBlock::new(layout),
                buffer,
            });
        }

        let mut frame_entries: Vec<wgpu::BindGroupLayoutEntry> =
            FRAME_BLOCKS.iter().map(|&(_, binding)| uniform_entry(binding)).collect();
        frame_entries.push(reflected_entry(SHADOW_MAP_BINDING, BindingKind::DepthTexture));
        frame_entries.push(reflected_entry(
            SHADOW_SAMPLER_BINDING,
            BindingKind::Sampler { comparison: true },
        ));
        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("frame_layout"),
            entries: &frame_entries,
        });
        let shadow_frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("shadow_frame_layout"),
            entries: &[uniform_entry(2)],
        });
        let empty_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("empty_layout"),
            entries: &[],
        });
        let instances_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("instances_layout"),
            entries: &[reflected_entry(0, BindingKind::StorageBuffer { read_only: true })],
        });

        let mut entries: Vec<wgpu::BindGroupEntry> = frame_blocks
            .iter()
            .zip(FRAME_BLOCKS)
            .map(|(fb, (_, binding))| wgpu::BindGroupEntry {
                binding,
                resource: fb.buffer.as_entire_binding(),
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: SHADOW_MAP_BINDING,
            resource: wgpu::BindingResource::TextureView(&shadow_view),
        });
        entries.push(wgpu::BindGroupEntry {
            binding: SHADOW_SAMPLER_BINDING,
            resource: wgpu::BindingResource::Sampler(&shadow_sampler),
        });
        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("frame_bind_group"),
            layout: &frame_layout,
            entries: &entries,
        });
        let shadow_frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("shadow_frame_bind_group"),
            layout: &shadow_frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 2,
                resource: frame_blocks[2].buffer.as_entire_binding(),
            }],
        });
        let empty_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("empty_bind_group"),
            layout: &empty_layout,
            entries: &[],
        });

        let (instance_buffer, instances_bind_group) =
            Self::instance_storage(&device, &instances_layout, MIN_INSTANCE_CAPACITY);
        let white = Self::upload_texture_data(
            &device,
            &queue,
            &TextureInstance {
                name: "__white".into(),
                slot: 0,
                data: crate::assets::texture::TextureData::solid([255; 4]),
                descriptor: Default::default(),
            },
        );

        let [r, g, b, a] = clear_color.map(f64::from);
        Ok(Self {
            device,
            queue,
            width,
            height,
            clear_color: wgpu::Color { r, g, b, a },
            color_target,
            color_view,
            depth_view,
            shadow_view,
            frame_layout,
            shadow_frame_layout,
            empty_layout,
            instances_layout,
            frame_bind_group,
            shadow_frame_bind_group,
            empty_bind_group,
            frame_blocks,
            instance_buffer,
            instance_capacity: MIN_INSTANCE_CAPACITY,
            instances_bind_group,
            instances: Vec::new(),
            modules: HashMap::new(),
            meshes: HashMap::new(),
            textures: HashMap::new(),
            white,
            materials: HashMap::new(),
            shadow_pipelines: HashMap::new(),
            frame: FrameUniforms::default(),
            pass: None,
            recorded: Vec::new(),
        })
    }

    fn instance_storage(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        capacity: u64,
    ) -> (wgpu::Buffer, wgpu::BindGroup) {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("instances"),
            size: capacity * MAT4_BYTES,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("instances_bind_group"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });
        (buffer, bind_group)
    }

    fn upload_texture_data(device: &wgpu::Device, queue: &wgpu::Queue, texture: &TextureInstance) -> GpuTexture {
        let format = match texture.data.format {
            TextureFormat::Rgba8 => wgpu::TextureFormat::Rgba8UnormSrgb,
            TextureFormat::R8 => wgpu::TextureFormat::R8Unorm,
        };
        let gpu = device.create_texture_with_data(
            queue,
            &wgpu::TextureDescriptor {
                label: Some(texture.name.as_str()),
                size: wgpu::Extent3d {
                    width: texture.data.width,
                    height: texture.data.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &texture.data.pixels,
        );
        let address = match texture.descriptor.wrap {
            TextureWrap::Repeat => wgpu::AddressMode::Repeat,
            TextureWrap::ClampToEdge => wgpu::AddressMode::ClampToEdge,
            TextureWrap::MirroredRepeat => wgpu::AddressMode::MirrorRepeat,
        };
        let filter = match texture.descriptor.filter {
            TextureFilter::Linear => wgpu::FilterMode::Linear,
            TextureFilter::Nearest => wgpu::FilterMode::Nearest,
        };
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(texture.name.as_str()),
            address_mode_u: address,
            address_mode_v: address,
            mag_filter: filter,
            min_filter: filter,
            ..Default::default()
        });
        GpuTexture {
            view: gpu.create_view(&wgpu::TextureViewDescriptor::default()),
            sampler,
        }
    }

    /// Run `build` inside a validation error scope. Invalid shaders and
    /// pipelines come back as errors instead of aborting.
    fn validated<T>(&self, what: &str, build: impl FnOnce(&wgpu::Device) -> T) -> Result<T, RenderError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = build(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            None => Ok(value),
            Some(err) => Err(RenderError::Validation {
                what: what.to_owned(),
                log: err.to_string(),
            }),
        }
    }

    /// Compile `shader` once per content hash.
    fn ensure_module(&mut self, shader: &ShaderInstance) -> Result<(), RenderError> {
        if self.modules.contains_key(&shader.hash) {
            return Ok(());
        }
        let ShaderSource::Wgsl(source) = &shader.source else {
            return Err(RenderError::ShaderCompile {
                name: shader.name.clone(),
                log: "WebGPU device needs WGSL shaders".into(),
            });
        };
        let module = self.validated(&shader.name, |device| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(shader.name.as_str()),
                source: wgpu::ShaderSource::Wgsl(source.as_str().into()),
            })
        })?;
        self.modules.insert(shader.hash.clone(), module);
        Ok(())
    }

    fn texture(&mut self, texture: &TextureInstance) -> &GpuTexture {
        if !self.textures.contains_key(&texture.name) {
            let gpu = Self::upload_texture_data(&self.device, &self.queue, texture);
            self.textures.insert(texture.name.clone(), gpu);
        }
        &self.textures[&texture.name]
    }

    fn build_material(&mut self, material: &MaterialInstance) -> Result<GpuMaterial, RenderError> {
        let shader = &material.shader;
        self.ensure_module(shader)?;
        for texture in &material.textures {
            self.texture(texture);
        }
        let module = &self.modules[&shader.hash];

        let reflected = shader.reflection.group(MATERIAL_GROUP);
        let layout_entries: Vec<wgpu::BindGroupLayoutEntry> = reflected
            .iter()
            .map(|b| reflected_entry(b.binding, b.kind))
            .collect();
        let material_layout = self.validated(&material.name, |device| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(material.name.as_str()),
                entries: &layout_entries,
            })
        })?;

        let uniforms = match &material.uniform_block {
            Some(block) => Some(self.validated(&material.name, |device| {
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(material.name.as_str()),
                    contents: block.bytes(),
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                })
            })?),
            None => None,
        };

        // Samplers pair with the texture bound just before them.
        let mut last_texture: &GpuTexture = &self.white;
        let mut entries = Vec::with_capacity(reflected.len());
        for binding in &reflected {
            let resource = match binding.kind {
                BindingKind::UniformBuffer => match &uniforms {
                    Some(buffer) => buffer.as_entire_binding(),
                    None => {
                        return Err(RenderError::Device(format!(
                            "material '{}' has no data for block '{}'",
                            material.name, binding.name
                        )))
                    }
                },
                BindingKind::Texture => {
                    let bound = material
                        .texture_bindings
                        .iter()
                        .find(|t| t.slot == binding.binding)
                        .and_then(|t| t.texture.as_ref())
                        .and_then(|t| self.textures.get(&t.name));
                    last_texture = bound.unwrap_or(&self.white);
                    wgpu::BindingResource::TextureView(&last_texture.view)
                }
                BindingKind::Sampler { .. } => wgpu::BindingResource::Sampler(&last_texture.sampler),
                other => {
                    return Err(RenderError::Device(format!(
                        "unsupported material binding '{}' ({other:?})",
                        binding.name
                    )))
                }
            };
            entries.push(wgpu::BindGroupEntry {
                binding: binding.binding,
                resource,
            });
        }
        let (bind_group, pipeline_layout) = self.validated(&material.name, |device| {
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(material.name.as_str()),
                layout: &material_layout,
                entries: &entries,
            });
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(material.name.as_str()),
                bind_group_layouts: &[&self.frame_layout, &material_layout, &self.instances_layout],
                push_constant_ranges: &[],
            });
            (bind_group, pipeline_layout)
        })?;
        let descriptor = material.descriptor;
        let vertex_entry = shader.reflection.entry_point(ShaderStage::Vertex).unwrap_or("vs_main");
        let fragment_entry = shader.reflection.entry_point(ShaderStage::Fragment).unwrap_or("fs_main");
        let pipeline = self.validated(&material.name, |device| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(material.name.as_str()),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module,
                    entry_point: Some(vertex_entry),
                    buffers: &[vertex_layout()],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module,
                    entry_point: Some(fragment_entry),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: COLOR_FORMAT,
                        blend: Some(blend_state(descriptor.blend)),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: primitive_state(&descriptor),
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: descriptor.depth_write,
                    depth_compare: if descriptor.depth_test {
                        wgpu::CompareFunction::Less
                    } else {
                        wgpu::CompareFunction::Always
                    },
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        })?;

        Ok(GpuMaterial {
            pipeline,
            bind_group,
            _uniforms: uniforms,
        })
    }

    fn build_shadow_pipeline(&mut self) -> Result<wgpu::RenderPipeline, RenderError> {
        let Some(ShaderSource::Wgsl(source)) = builtin::source(builtin::SHADOW_DEPTH, Backend::WebGpu) else {
            return Err(RenderError::Device("shadow_depth template missing".into()));
        };
        let module = self.validated(builtin::SHADOW_DEPTH, |device| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(builtin::SHADOW_DEPTH),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            })
        })?;
        let layout = self.validated(builtin::SHADOW_DEPTH, |device| {
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("shadow_layout"),
                bind_group_layouts: &[&self.shadow_frame_layout, &self.empty_layout, &self.instances_layout],
                push_constant_ranges: &[],
            })
        })?;
        self.validated(builtin::SHADOW_DEPTH, |device| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("shadow_pipeline"),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs_main"),
                    buffers: &[vertex_layout()],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: None,
                primitive: primitive_state(&MaterialDescriptor::default()),
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::LessEqual,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState {
                        constant: 2,
                        slope_scale: 2.0,
                        clamp: 0.0,
                    },
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        })
    }

    fn ensure_instance_capacity(&mut self) {
        let needed = self.instances.len() as u64;
        if needed <= self.instance_capacity {
            return;
        }
        let capacity = needed.next_power_of_two();
        let (buffer, bind_group) = Self::instance_storage(&self.device, &self.instances_layout, capacity);
        self.instance_buffer = buffer;
        self.instances_bind_group = bind_group;
        self.instance_capacity = capacity;
        tracing::debug!(capacity, "instance buffer grown");
    }

    fn encode_draws(&self, pass: &mut wgpu::RenderPass<'_>, kind: PassKind) {
        for (draw, mesh_key) in self.recorded.iter().filter(|(d, _)| d.pass == kind) {
            let Some(mesh) = self.meshes.get(mesh_key) else {
                continue;
            };
            match (kind, draw.material) {
                (PassKind::Shadow, _) => {
                    let Some(pipeline) = self.shadow_pipelines.get(mesh_key) else {
                        continue;
                    };
                    pass.set_pipeline(pipeline);
                    pass.set_bind_group(0, &self.shadow_frame_bind_group, &[]);
                    pass.set_bind_group(1, &self.empty_bind_group, &[]);
                }
                (PassKind::Base, Some(id)) => {
                    let Some(material) = self.materials.get(&id) else {
                        continue;
                    };
                    pass.set_pipeline(&material.pipeline);
                    pass.set_bind_group(0, &self.frame_bind_group, &[]);
                    pass.set_bind_group(1, &material.bind_group, &[]);
                }
                (PassKind::Base, None) => continue,
            }
            pass.set_bind_group(2, &self.instances_bind_group, &[]);
            pass.set_vertex_buffer(0, mesh.vertices.slice(..));
            let instances = draw.first_instance..draw.first_instance + draw.instance_count;
            match &mesh.indices {
                Some(indices) => {
                    pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
                    pass.draw_indexed(0..mesh.count, 0, instances);
                }
                None => pass.draw(0..mesh.count, instances),
            }
        }
    }

    /// Block until `buffer` is mapped and return its contents.
    fn read_buffer(&self, buffer: &wgpu::Buffer) -> Result<Vec<u8>, RenderError> {
        let slice = buffer.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|err| RenderError::Readback(err.to_string()))?
            .map_err(|err| RenderError::Readback(err.to_string()))?;
        let bytes = slice.get_mapped_range().to_vec();
        buffer.unmap();
        Ok(bytes)
    }

    /// RGBA8 pixels of the last rendered frame, rows tightly packed.
    pub fn read_pixels(&self) -> Result<Vec<u8>, RenderError> {
        let unpadded = self.width * 4;
        let padded = unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("pixel_readback"),
            size: u64::from(padded * self.height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("pixel_readback"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.color_target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let bytes = self.read_buffer(&staging)?;
        Ok(bytes
            .chunks_exact(padded as usize)
            .flat_map(|row| &row[..unpadded as usize])
            .copied()
            .collect())
    }
}

impl RenderDevice for WgpuDevice {
    const BACKEND: Backend = Backend::WebGpu;
    const MAX_LIGHTS: usize = 4;

    fn upload_mesh(&mut self, mesh: &MeshInstance) {
        if self.meshes.contains_key(&mesh.hash) {
            return;
        }
        let vertices = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(mesh.name.as_str()),
            contents: bytemuck::cast_slice(&mesh.data.interleaved()),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let indices = mesh.data.is_indexed().then(|| {
            self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(mesh.name.as_str()),
                contents: bytemuck::cast_slice(&mesh.data.indices),
                usage: wgpu::BufferUsages::INDEX,
            })
        });
        self.meshes.insert(
            mesh.hash.clone(),
            GpuMesh {
                vertices,
                indices,
                count: mesh.data.element_count(),
            },
        );
        tracing::debug!(mesh = %mesh.name, "mesh uploaded");
    }

    fn prepare_material(&mut self, material: &MaterialInstance) {
        if self.materials.contains_key(&material.id) {
            return;
        }
        match self.build_material(material) {
            Ok(gpu) => {
                self.materials.insert(material.id, gpu);
            }
            Err(err) => tracing::error!(material = %material.name, %err, "material pipeline rejected"),
        }
    }

    fn prepare_shadow_pipeline(&mut self, mesh: &MeshInstance) {
        self.upload_mesh(mesh);
        if self.shadow_pipelines.contains_key(&mesh.hash) {
            return;
        }
        match self.build_shadow_pipeline() {
            Ok(pipeline) => {
                self.shadow_pipelines.insert(mesh.hash.clone(), pipeline);
            }
            Err(err) => tracing::error!(mesh = %mesh.name, %err, "shadow pipeline rejected"),
        }
    }

    fn begin_frame(&mut self, frame: &FrameUniforms) {
        self.frame = frame.clone();
        self.instances.clear();
        self.recorded.clear();
    }

    fn begin_pass(&mut self, pass: PassKind) {
        self.pass = Some(pass);
    }

    fn push_instances(&mut self, models: &[Mat4]) -> u32 {
        let first = self.instances.len() as u32;
        self.instances.extend_from_slice(models);
        first
    }

    fn draw(&mut self, call: &DrawCall<'_>) {
        let Some(pass) = self.pass else {
            tracing::warn!("draw outside a pass ignored");
            return;
        };
        self.recorded.push((
            RecordedDraw {
                pass,
                material: call.material.map(|m| m.id),
                first_instance: call.first_instance,
                instance_count: call.instance_count,
            },
            call.mesh.hash.clone(),
        ));
    }

    fn end_pass(&mut self) {
        self.pass = None;
    }

    fn end_frame(&mut self) {
        for fb in &mut self.frame_blocks {
            self.frame.fill_block(fb.name, &mut fb.block);
            self.queue.write_buffer(&fb.buffer, 0, fb.block.bytes());
        }
        self.ensure_instance_capacity();
        if !self.instances.is_empty() {
            self.queue
                .write_buffer(&self.instance_buffer, 0, bytemuck::cast_slice(&self.instances));
        }

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("frame"),
        });
        if self.recorded.iter().any(|(d, _)| d.pass == PassKind::Shadow) {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("shadow_pass"),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.shadow_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            self.encode_draws(&mut pass, PassKind::Shadow);
        }
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("base_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_color),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            self.encode_draws(&mut pass, PassKind::Base);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }
}

impl ComputeDevice for WgpuDevice {
    fn dispatch(&mut self, job: &ComputeJob<'_>) -> Result<Vec<f32>, RenderError> {
        job.check()?;
        self.ensure_module(job.shader)?;
        let module = &self.modules[&job.shader.hash];
        let entry = job
            .shader
            .reflection
            .entry_point(ShaderStage::Compute)
            .unwrap_or("cs_main");
        let pipeline = self.validated(&job.shader.name, |device| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(job.shader.name.as_str()),
                layout: None,
                module,
                entry_point: Some(entry),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            })
        })?;

        let size = std::mem::size_of_val(job.input) as u64;
        let (storage, staging, bind_group) = self.validated(&job.shader.name, |device| {
            let storage = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("compute_data"),
                contents: bytemuck::cast_slice(job.input),
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            });
            let staging = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("compute_readback"),
                size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("compute_bind_group"),
                layout: &pipeline.get_bind_group_layout(0),
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: storage.as_entire_binding(),
                }],
            });
            (storage, staging, bind_group)
        })?;

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("compute"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("compute_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            let [x, y, z] = job.workgroups;
            pass.dispatch_workgroups(x, y, z);
        }
        encoder.copy_buffer_to_buffer(&storage, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let bytes = self.read_buffer(&staging)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}
