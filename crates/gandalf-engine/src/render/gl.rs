//! OpenGL 4.1 device.
//!
//! Immediate-mode: every draw binds its program, uploads loose `u_*`
//! uniforms and issues `glDrawElements[Instanced]`. Model matrices live in a
//! single per-frame instance buffer read through the `a_Model` attribute
//! (locations 3..6, divisor 1); each draw re-points the attribute at its
//! first instance.
//!
//! The caller owns the GL context and must make it current before creating
//! the device.

#![allow(unsafe_code)]

use std::collections::HashMap;
use std::ffi::{c_void, CString};
use std::ptr;

use gl::types::{GLenum, GLint, GLsizei, GLsizeiptr, GLuint};
use glam::Mat4;

use crate::assets::layout::UniformValue;
use crate::assets::material::{BlendMode, CullMode, MaterialDescriptor, MaterialId, MaterialInstance, PrimitiveTopology};
use crate::assets::mesh::{MeshInstance, VERTEX_STRIDE_FLOATS};
use crate::assets::shader::{builtin, ShaderInstance, ShaderSource};
use crate::assets::texture::{TextureFilter, TextureFormat, TextureInstance, TextureWrap};
use crate::config::Backend;
use crate::error::RenderError;
use crate::render::device::{DrawCall, PassKind, RenderDevice};
use crate::render::uniforms::{material_gl_uniforms, FrameUniforms};

const MODEL_LOCATION: GLuint = 3;
const MAT4_BYTES: usize = std::mem::size_of::<Mat4>();

// ---------------------------------------------------------------------------
// Programs
// ---------------------------------------------------------------------------

struct Program {
    id: GLuint,
    locations: HashMap<String, GLint>,
}

impl Program {
    fn link(name: &str, vertex: &str, fragment: &str) -> Result<Self, RenderError> {
        let vs = compile(name, vertex, gl::VERTEX_SHADER)?;
        let fs = match compile(name, fragment, gl::FRAGMENT_SHADER) {
            Ok(fs) => fs,
            Err(err) => {
                unsafe { gl::DeleteShader(vs) };
                return Err(err);
            }
        };
        unsafe {
            let id = gl::CreateProgram();
            gl::AttachShader(id, vs);
            gl::AttachShader(id, fs);
            gl::LinkProgram(id);
            gl::DeleteShader(vs);
            gl::DeleteShader(fs);

            let mut status = gl::FALSE as GLint;
            gl::GetProgramiv(id, gl::LINK_STATUS, &mut status);
            if status != gl::TRUE as GLint {
                let mut len = 0;
                gl::GetProgramiv(id, gl::INFO_LOG_LENGTH, &mut len);
                let mut buf = vec![0u8; len.max(1) as usize];
                gl::GetProgramInfoLog(id, len, ptr::null_mut(), buf.as_mut_ptr().cast());
                gl::DeleteProgram(id);
                return Err(RenderError::ProgramLink {
                    name: name.to_owned(),
                    log: String::from_utf8_lossy(&buf).trim_end_matches('\0').to_owned(),
                });
            }
            Ok(Self {
                id,
                locations: HashMap::new(),
            })
        }
    }

    fn location(&mut self, name: &str) -> GLint {
        if let Some(&loc) = self.locations.get(name) {
            return loc;
        }
        let loc = match CString::new(name) {
            Ok(c) => unsafe { gl::GetUniformLocation(self.id, c.as_ptr()) },
            Err(_) => -1,
        };
        self.locations.insert(name.to_owned(), loc);
        loc
    }

    fn set(&mut self, name: &str, value: &UniformValue) {
        let loc = self.location(name);
        if loc < 0 {
            return;
        }
        unsafe {
            match value {
                UniformValue::F32(v) => gl::Uniform1f(loc, *v),
                UniformValue::I32(v) => gl::Uniform1i(loc, *v),
                UniformValue::U32(v) => gl::Uniform1ui(loc, *v),
                UniformValue::Vec2(v) => gl::Uniform2f(loc, v.x, v.y),
                UniformValue::Vec3(v) => gl::Uniform3f(loc, v.x, v.y, v.z),
                UniformValue::Vec4(v) => gl::Uniform4f(loc, v.x, v.y, v.z, v.w),
                UniformValue::Mat3(m) => gl::UniformMatrix3fv(loc, 1, gl::FALSE, m.as_ref().as_ptr()),
                UniformValue::Mat4(m) => gl::UniformMatrix4fv(loc, 1, gl::FALSE, m.as_ref().as_ptr()),
            }
        }
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        unsafe { gl::DeleteProgram(self.id) };
    }
}

fn compile(name: &str, source: &str, kind: GLenum) -> Result<GLuint, RenderError> {
    let source = CString::new(source).map_err(|_| RenderError::ShaderCompile {
        name: name.to_owned(),
        log: "source contains a NUL byte".into(),
    })?;
    unsafe {
        let id = gl::CreateShader(kind);
        gl::ShaderSource(id, 1, &source.as_ptr(), ptr::null());
        gl::CompileShader(id);

        let mut status = gl::FALSE as GLint;
        gl::GetShaderiv(id, gl::COMPILE_STATUS, &mut status);
        if status != gl::TRUE as GLint {
            let mut len = 0;
            gl::GetShaderiv(id, gl::INFO_LOG_LENGTH, &mut len);
            let mut buf = vec![0u8; len.max(1) as usize];
            gl::GetShaderInfoLog(id, len, ptr::null_mut(), buf.as_mut_ptr().cast());
            gl::DeleteShader(id);
            return Err(RenderError::ShaderCompile {
                name: name.to_owned(),
                log: String::from_utf8_lossy(&buf).trim_end_matches('\0').to_owned(),
            });
        }
        Ok(id)
    }
}

fn glsl_sources(shader: &ShaderInstance) -> Option<(&str, &str)> {
    match &shader.source {
        ShaderSource::Glsl { vertex, fragment } => Some((vertex, fragment)),
        ShaderSource::Wgsl(_) => None,
    }
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

struct GlMesh {
    vao: GLuint,
    vbo: GLuint,
    ebo: Option<GLuint>,
    count: GLsizei,
}

impl Drop for GlMesh {
    fn drop(&mut self) {
        unsafe {
            gl::DeleteVertexArrays(1, &self.vao);
            gl::DeleteBuffers(1, &self.vbo);
            if let Some(ebo) = self.ebo {
                gl::DeleteBuffers(1, &ebo);
            }
        }
    }
}

struct GlTexture(GLuint);

impl Drop for GlTexture {
    fn drop(&mut self) {
        unsafe { gl::DeleteTextures(1, &self.0) };
    }
}

struct GlMaterial {
    /// Key into `GlDevice::programs`.
    program: String,
    descriptor: MaterialDescriptor,
    /// (sampler uniform, unit, texture name or `None` for the fallback).
    textures: Vec<(String, u32, Option<String>)>,
    shadow_sampler: Option<(String, u32)>,
}

fn upload_texture(texture: &TextureInstance) -> GlTexture {
    let data = &texture.data;
    let (internal, format) = match data.format {
        TextureFormat::Rgba8 => (gl::RGBA8, gl::RGBA),
        TextureFormat::R8 => (gl::R8, gl::RED),
    };
    let wrap = match texture.descriptor.wrap {
        TextureWrap::Repeat => gl::REPEAT,
        TextureWrap::ClampToEdge => gl::CLAMP_TO_EDGE,
        TextureWrap::MirroredRepeat => gl::MIRRORED_REPEAT,
    };
    let (min, mag) = match (texture.descriptor.filter, texture.descriptor.mipmaps) {
        (TextureFilter::Linear, true) => (gl::LINEAR_MIPMAP_LINEAR, gl::LINEAR),
        (TextureFilter::Linear, false) => (gl::LINEAR, gl::LINEAR),
        (TextureFilter::Nearest, true) => (gl::NEAREST_MIPMAP_NEAREST, gl::NEAREST),
        (TextureFilter::Nearest, false) => (gl::NEAREST, gl::NEAREST),
    };
    let mut id = 0;
    unsafe {
        gl::GenTextures(1, &mut id);
        gl::BindTexture(gl::TEXTURE_2D, id);
        gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_WRAP_S, wrap as _);
        gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_WRAP_T, wrap as _);
        gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MIN_FILTER, min as _);
        gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MAG_FILTER, mag as _);
        gl::PixelStorei(gl::UNPACK_ALIGNMENT, 1);
        gl::TexImage2D(
            gl::TEXTURE_2D,
            0,
            internal as _,
            data.width as _,
            data.height as _,
            0,
            format,
            gl::UNSIGNED_BYTE,
            data.pixels.as_ptr().cast(),
        );
        if texture.descriptor.mipmaps {
            gl::GenerateMipmap(gl::TEXTURE_2D);
        }
        gl::BindTexture(gl::TEXTURE_2D, 0);
    }
    GlTexture(id)
}

fn topology(primitive: PrimitiveTopology) -> GLenum {
    match primitive {
        PrimitiveTopology::Triangles => gl::TRIANGLES,
        PrimitiveTopology::Lines => gl::LINES,
        PrimitiveTopology::Points => gl::POINTS,
    }
}

fn apply_state(descriptor: &MaterialDescriptor) {
    unsafe {
        match descriptor.cull {
            CullMode::None => gl::Disable(gl::CULL_FACE),
            CullMode::Back => {
                gl::Enable(gl::CULL_FACE);
                gl::CullFace(gl::BACK);
            }
            CullMode::Front => {
                gl::Enable(gl::CULL_FACE);
                gl::CullFace(gl::FRONT);
            }
        }
        match descriptor.blend {
            BlendMode::Opaque => gl::Disable(gl::BLEND),
            BlendMode::Alpha => {
                gl::Enable(gl::BLEND);
                gl::BlendFunc(gl::SRC_ALPHA, gl::ONE_MINUS_SRC_ALPHA);
            }
            BlendMode::Additive => {
                gl::Enable(gl::BLEND);
                gl::BlendFunc(gl::ONE, gl::ONE);
            }
        }
        if descriptor.depth_test {
            gl::Enable(gl::DEPTH_TEST);
        } else {
            gl::Disable(gl::DEPTH_TEST);
        }
        gl::DepthMask(if descriptor.depth_write { gl::TRUE } else { gl::FALSE });
    }
}

// ---------------------------------------------------------------------------
// GlDevice
// ---------------------------------------------------------------------------

pub struct GlDevice {
    width: u32,
    height: u32,
    clear_color: [f32; 4],
    programs: HashMap<String, Program>,
    meshes: HashMap<String, GlMesh>,
    materials: HashMap<MaterialId, GlMaterial>,
    textures: HashMap<String, GlTexture>,
    white: GlTexture,
    instance_vbo: GLuint,
    instance_capacity: usize,
    instances: Vec<Mat4>,
    shadow_fbo: GLuint,
    shadow_map: GlTexture,
    shadow_map_size: u32,
    shadow_program: Option<Program>,
    frame: FrameUniforms,
    pass: Option<PassKind>,
}

impl GlDevice {
    /// Load GL entry points through `loader` and create the frame resources.
    pub fn new(
        loader: impl FnMut(&'static str) -> *const c_void,
        width: u32,
        height: u32,
        clear_color: [f32; 4],
        shadow_map_size: u32,
    ) -> Result<Self, RenderError> {
        gl::load_with(loader);
        if !gl::CreateProgram::is_loaded() {
            return Err(RenderError::Device("OpenGL entry points failed to load".into()));
        }

        let white = upload_texture(&TextureInstance {
            name: "__white".into(),
            slot: 0,
            data: crate::assets::texture::TextureData::solid([255; 4]),
            descriptor: Default::default(),
        });

        let mut instance_vbo = 0;
        let mut shadow_fbo = 0;
        let mut depth = 0;
        unsafe {
            gl::GenBuffers(1, &mut instance_vbo);

            gl::GenTextures(1, &mut depth);
            gl::BindTexture(gl::TEXTURE_2D, depth);
            gl::TexImage2D(
                gl::TEXTURE_2D,
                0,
                gl::DEPTH_COMPONENT32F as _,
                shadow_map_size as _,
                shadow_map_size as _,
                0,
                gl::DEPTH_COMPONENT,
                gl::FLOAT,
                ptr::null(),
            );
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MIN_FILTER, gl::LINEAR as _);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MAG_FILTER, gl::LINEAR as _);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_WRAP_S, gl::CLAMP_TO_BORDER as _);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_WRAP_T, gl::CLAMP_TO_BORDER as _);
            let border = [1.0f32; 4];
            gl::TexParameterfv(gl::TEXTURE_2D, gl::TEXTURE_BORDER_COLOR, border.as_ptr());
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_COMPARE_MODE, gl::COMPARE_REF_TO_TEXTURE as _);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_COMPARE_FUNC, gl::LEQUAL as _);

            gl::GenFramebuffers(1, &mut shadow_fbo);
            gl::BindFramebuffer(gl::FRAMEBUFFER, shadow_fbo);
            gl::FramebufferTexture2D(gl::FRAMEBUFFER, gl::DEPTH_ATTACHMENT, gl::TEXTURE_2D, depth, 0);
            gl::DrawBuffer(gl::NONE);
            gl::ReadBuffer(gl::NONE);
            let status = gl::CheckFramebufferStatus(gl::FRAMEBUFFER);
            gl::BindFramebuffer(gl::FRAMEBUFFER, 0);
            gl::BindTexture(gl::TEXTURE_2D, 0);
            if status != gl::FRAMEBUFFER_COMPLETE {
                return Err(RenderError::Device(format!("shadow framebuffer incomplete: 0x{status:x}")));
            }
        }
        tracing::info!(width, height, shadow_map_size, "OpenGL device created");

        Ok(Self {
            width,
            height,
            clear_color,
            programs: HashMap::new(),
            meshes: HashMap::new(),
            materials: HashMap::new(),
            textures: HashMap::new(),
            white,
            instance_vbo,
            instance_capacity: 0,
            instances: Vec::new(),
            shadow_fbo,
            shadow_map: GlTexture(depth),
            shadow_map_size,
            shadow_program: None,
            frame: FrameUniforms::default(),
            pass: None,
        })
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    fn ensure_program(&mut self, shader: &ShaderInstance) -> bool {
        if self.programs.contains_key(&shader.hash) {
            return true;
        }
        let Some((vertex, fragment)) = glsl_sources(shader) else {
            tracing::error!(shader = %shader.name, "OpenGL device needs GLSL shaders");
            return false;
        };
        match Program::link(&shader.name, vertex, fragment) {
            Ok(program) => {
                self.programs.insert(shader.hash.clone(), program);
                true
            }
            Err(err) => {
                tracing::error!(%err, "shader program rejected");
                false
            }
        }
    }

    /// Point `a_Model` of the bound VAO at instance `first`.
    fn bind_instances(&self, first: u32) {
        unsafe {
            gl::BindBuffer(gl::ARRAY_BUFFER, self.instance_vbo);
            for column in 0..4u32 {
                let location = MODEL_LOCATION + column;
                let offset = first as usize * MAT4_BYTES + column as usize * 16;
                gl::EnableVertexAttribArray(location);
                gl::VertexAttribPointer(location, 4, gl::FLOAT, gl::FALSE, MAT4_BYTES as GLsizei, offset as *const c_void);
                gl::VertexAttribDivisor(location, 1);
            }
            gl::BindBuffer(gl::ARRAY_BUFFER, 0);
        }
    }

    fn issue(&self, mesh: &GlMesh, mode: GLenum, call: &DrawCall<'_>) {
        unsafe {
            gl::BindVertexArray(mesh.vao);
            self.bind_instances(call.first_instance);
            match (mesh.ebo.is_some(), call.instanced()) {
                (true, true) => gl::DrawElementsInstanced(
                    mode,
                    mesh.count,
                    gl::UNSIGNED_INT,
                    ptr::null(),
                    call.instance_count as GLsizei,
                ),
                (true, false) => gl::DrawElements(mode, mesh.count, gl::UNSIGNED_INT, ptr::null()),
                (false, true) => gl::DrawArraysInstanced(mode, 0, mesh.count, call.instance_count as GLsizei),
                (false, false) => gl::DrawArrays(mode, 0, mesh.count),
            }
            gl::BindVertexArray(0);
        }
    }

    fn draw_shadow(&mut self, call: &DrawCall<'_>) {
        let Some(mesh) = self.meshes.get(&call.mesh.hash) else {
            return;
        };
        let Some(program) = self.shadow_program.as_mut() else {
            return;
        };
        unsafe { gl::UseProgram(program.id) };
        program.set("u_LightSpace", &self.frame.light_space.into());
        self.issue(mesh, gl::TRIANGLES, call);
    }

    fn draw_material(&mut self, material: &MaterialInstance, call: &DrawCall<'_>) {
        let Some(prepared) = self.materials.get(&material.id) else {
            tracing::warn!(material = %material.name, "draw with an unprepared material");
            return;
        };
        let Some(mesh) = self.meshes.get(&call.mesh.hash) else {
            tracing::warn!(mesh = %call.mesh.name, "draw with a mesh that was never uploaded");
            return;
        };
        let Some(program) = self.programs.get_mut(&prepared.program) else {
            return;
        };

        apply_state(&prepared.descriptor);
        unsafe { gl::UseProgram(program.id) };
        for (name, value) in self.frame.gl_uniforms() {
            program.set(&name, &value);
        }
        for (name, value) in material_gl_uniforms(material) {
            program.set(name, &value);
        }
        for (uniform, unit, texture) in &prepared.textures {
            let id = texture
                .as_ref()
                .and_then(|t| self.textures.get(t))
                .map_or(self.white.0, |t| t.0);
            unsafe {
                gl::ActiveTexture(gl::TEXTURE0 + unit);
                gl::BindTexture(gl::TEXTURE_2D, id);
            }
            program.set(uniform, &(*unit as i32).into());
        }
        if let Some((uniform, unit)) = &prepared.shadow_sampler {
            unsafe {
                gl::ActiveTexture(gl::TEXTURE0 + unit);
                gl::BindTexture(gl::TEXTURE_2D, self.shadow_map.0);
            }
            program.set(uniform, &(*unit as i32).into());
        }
        self.issue(mesh, topology(prepared.descriptor.primitive), call);
    }
}

impl RenderDevice for GlDevice {
    const BACKEND: Backend = Backend::OpenGl;
    const MAX_LIGHTS: usize = 16;

    fn upload_mesh(&mut self, mesh: &MeshInstance) {
        if self.meshes.contains_key(&mesh.hash) {
            return;
        }
        let vertices = mesh.data.interleaved();
        let stride = (VERTEX_STRIDE_FLOATS * std::mem::size_of::<f32>()) as GLsizei;
        let (mut vao, mut vbo) = (0, 0);
        let mut ebo = None;
        unsafe {
            gl::GenVertexArrays(1, &mut vao);
            gl::BindVertexArray(vao);

            gl::GenBuffers(1, &mut vbo);
            gl::BindBuffer(gl::ARRAY_BUFFER, vbo);
            gl::BufferData(
                gl::ARRAY_BUFFER,
                std::mem::size_of_val(vertices.as_slice()) as GLsizeiptr,
                vertices.as_ptr().cast(),
                gl::STATIC_DRAW,
            );
            for (location, (components, offset)) in [(3, 0usize), (3, 3), (2, 6)].into_iter().enumerate() {
                gl::VertexAttribPointer(
                    location as GLuint,
                    components,
                    gl::FLOAT,
                    gl::FALSE,
                    stride,
                    (offset * std::mem::size_of::<f32>()) as *const c_void,
                );
                gl::EnableVertexAttribArray(location as GLuint);
            }

            if mesh.data.is_indexed() {
                let mut id = 0;
                gl::GenBuffers(1, &mut id);
                gl::BindBuffer(gl::ELEMENT_ARRAY_BUFFER, id);
                gl::BufferData(
                    gl::ELEMENT_ARRAY_BUFFER,
                    std::mem::size_of_val(mesh.data.indices.as_slice()) as GLsizeiptr,
                    mesh.data.indices.as_ptr().cast(),
                    gl::STATIC_DRAW,
                );
                ebo = Some(id);
            }
            gl::BindVertexArray(0);
            gl::BindBuffer(gl::ARRAY_BUFFER, 0);
            gl::BindBuffer(gl::ELEMENT_ARRAY_BUFFER, 0);
        }
        tracing::debug!(mesh = %mesh.name, "mesh uploaded");
        self.meshes.insert(
            mesh.hash.clone(),
            GlMesh {
                vao,
                vbo,
                ebo,
                count: mesh.data.element_count() as GLsizei,
            },
        );
    }

    fn prepare_material(&mut self, material: &MaterialInstance) {
        if self.materials.contains_key(&material.id) || !self.ensure_program(&material.shader) {
            return;
        }
        for texture in &material.textures {
            if !self.textures.contains_key(&texture.name) {
                self.textures.insert(texture.name.clone(), upload_texture(texture));
            }
        }
        let textures = material
            .texture_bindings
            .iter()
            .map(|b| (b.name.clone(), b.slot, b.texture.as_ref().map(|t| t.name.clone())))
            .collect();
        let shadow_sampler = material
            .shader
            .reflection
            .samplers
            .iter()
            .find(|s| s.shadow)
            .map(|s| (s.name.clone(), s.unit));
        self.materials.insert(
            material.id,
            GlMaterial {
                program: material.shader.hash.clone(),
                descriptor: material.descriptor,
                textures,
                shadow_sampler,
            },
        );
    }

    fn prepare_shadow_pipeline(&mut self, mesh: &MeshInstance) {
        self.upload_mesh(mesh);
        if self.shadow_program.is_some() {
            return;
        }
        let Some(ShaderSource::Glsl { vertex, fragment }) = builtin::source(builtin::SHADOW_DEPTH, Backend::OpenGl) else {
            return;
        };
        match Program::link(builtin::SHADOW_DEPTH, &vertex, &fragment) {
            Ok(program) => self.shadow_program = Some(program),
            Err(err) => tracing::error!(%err, "shadow program rejected, shadows disabled"),
        }
    }

    fn begin_frame(&mut self, frame: &FrameUniforms) {
        self.frame = frame.clone();
        self.instances.clear();
    }

    fn begin_pass(&mut self, pass: PassKind) {
        self.pass = Some(pass);
        let [r, g, b, a] = self.clear_color;
        unsafe {
            match pass {
                PassKind::Shadow => {
                    gl::BindFramebuffer(gl::FRAMEBUFFER, self.shadow_fbo);
                    gl::Viewport(0, 0, self.shadow_map_size as _, self.shadow_map_size as _);
                    gl::Enable(gl::DEPTH_TEST);
                    gl::DepthMask(gl::TRUE);
                    gl::Clear(gl::DEPTH_BUFFER_BIT);
                }
                PassKind::Base => {
                    gl::BindFramebuffer(gl::FRAMEBUFFER, 0);
                    gl::Viewport(0, 0, self.width as _, self.height as _);
                    gl::ClearColor(r, g, b, a);
                    gl::DepthMask(gl::TRUE);
                    gl::Clear(gl::COLOR_BUFFER_BIT | gl::DEPTH_BUFFER_BIT);
                }
            }
        }
    }

    fn push_instances(&mut self, models: &[Mat4]) -> u32 {
        let first = self.instances.len();
        self.instances.extend_from_slice(models);
        unsafe {
            gl::BindBuffer(gl::ARRAY_BUFFER, self.instance_vbo);
            if self.instances.len() > self.instance_capacity {
                self.instance_capacity = self.instances.len().next_power_of_two();
                gl::BufferData(
                    gl::ARRAY_BUFFER,
                    (self.instance_capacity * MAT4_BYTES) as GLsizeiptr,
                    ptr::null(),
                    gl::DYNAMIC_DRAW,
                );
                gl::BufferSubData(
                    gl::ARRAY_BUFFER,
                    0,
                    (self.instances.len() * MAT4_BYTES) as GLsizeiptr,
                    self.instances.as_ptr().cast(),
                );
            } else {
                gl::BufferSubData(
                    gl::ARRAY_BUFFER,
                    (first * MAT4_BYTES) as _,
                    std::mem::size_of_val(models) as GLsizeiptr,
                    models.as_ptr().cast(),
                );
            }
            gl::BindBuffer(gl::ARRAY_BUFFER, 0);
        }
        first as u32
    }

    fn draw(&mut self, call: &DrawCall<'_>) {
        match (self.pass, call.material) {
            (Some(PassKind::Shadow), _) => self.draw_shadow(call),
            (Some(PassKind::Base), Some(material)) => self.draw_material(material, call),
            (pass, _) => tracing::warn!(?pass, "draw outside a matching pass ignored"),
        }
    }

    fn end_pass(&mut self) {
        self.pass = None;
        unsafe {
            gl::BindFramebuffer(gl::FRAMEBUFFER, 0);
            gl::UseProgram(0);
        }
    }

    fn end_frame(&mut self) {
        let error = unsafe { gl::GetError() };
        if error != gl::NO_ERROR {
            tracing::error!(code = error, "OpenGL error during frame");
        }
    }
}

impl Drop for GlDevice {
    fn drop(&mut self) {
        unsafe {
            gl::DeleteBuffers(1, &self.instance_vbo);
            gl::DeleteFramebuffers(1, &self.shadow_fbo);
        }
    }
}
