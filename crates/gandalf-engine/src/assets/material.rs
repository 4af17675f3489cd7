//! Material library.
//!
//! A material is a shader template plus parameters (textures, color,
//! glossiness) and a fixed-function descriptor. Instances are immutable and
//! deduplicated by a BLAKE3 hash of data and descriptor: building the same
//! material under a second name returns the first instance and records the
//! name as an alias.

use std::collections::HashMap;
use std::rc::Rc;

use glam::Vec4;
use serde::{Deserialize, Serialize};

use crate::assets::layout::HostBlock;
use crate::assets::reflect::{BindingKind, ShaderReflection};
use crate::assets::shader::{ShaderInstance, ShaderLib};
use crate::assets::texture::{TextureInstance, TextureLib};

/// Bind group that holds per-material resources in the WGSL templates.
pub const MATERIAL_GROUP: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialData {
    /// Name of the shader template in the [`ShaderLib`].
    pub base_template: String,
    pub textures: Vec<String>,
    pub color: [f32; 4],
    pub glossiness: f32,
}

impl MaterialData {
    pub fn new(base_template: impl Into<String>) -> Self {
        Self {
            base_template: base_template.into(),
            textures: Vec::new(),
            color: [1.0; 4],
            glossiness: 32.0,
        }
    }

    pub fn with_color(mut self, color: [f32; 4]) -> Self {
        self.color = color;
        self
    }

    pub fn with_texture(mut self, texture: impl Into<String>) -> Self {
        self.textures.push(texture.into());
        self
    }

    pub fn with_glossiness(mut self, glossiness: f32) -> Self {
        self.glossiness = glossiness;
        self
    }
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PrimitiveTopology {
    #[default]
    Triangles,
    Lines,
    Points,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CullMode {
    #[default]
    Back,
    Front,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BlendMode {
    #[default]
    Opaque,
    Alpha,
    Additive,
}

/// Fixed-function state of a material's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MaterialDescriptor {
    pub primitive: PrimitiveTopology,
    pub cull: CullMode,
    pub blend: BlendMode,
    pub depth_test: bool,
    pub depth_write: bool,
    pub cast_shadows: bool,
}

impl Default for MaterialDescriptor {
    fn default() -> Self {
        Self {
            primitive: PrimitiveTopology::Triangles,
            cull: CullMode::Back,
            blend: BlendMode::Opaque,
            depth_test: true,
            depth_write: true,
            cast_shadows: true,
        }
    }
}

// ---------------------------------------------------------------------------
// MaterialInstance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub u32);

/// A texture slot declared by the shader and the texture bound to it.
///
/// `texture` is `None` when the material lists fewer textures than the
/// shader declares; devices bind a white fallback there.
#[derive(Debug, Clone)]
pub struct TextureBinding {
    /// WGSL binding name or GLSL sampler uniform name.
    pub name: String,
    /// WGSL binding index or GLSL texture unit.
    pub slot: u32,
    pub texture: Option<Rc<TextureInstance>>,
}

#[derive(Debug)]
pub struct MaterialInstance {
    pub id: MaterialId,
    /// The name the instance was first built under.
    pub name: String,
    pub hash: String,
    pub data: MaterialData,
    pub descriptor: MaterialDescriptor,
    pub shader: Rc<ShaderInstance>,
    pub textures: Vec<Rc<TextureInstance>>,
    pub texture_bindings: Vec<TextureBinding>,
    /// Host mirror of the shader's material uniform buffer, when it has one.
    pub uniform_block: Option<HostBlock>,
}

impl MaterialInstance {
    pub fn color(&self) -> Vec4 {
        Vec4::from_array(self.data.color)
    }

    pub fn glossiness(&self) -> f32 {
        self.data.glossiness
    }
}

fn material_hash(data: &MaterialData, descriptor: &MaterialDescriptor) -> String {
    let mut hasher = blake3::Hasher::new();
    // Both types serialize without maps, so the JSON is deterministic.
    let json = serde_json::to_vec(&(data, descriptor)).unwrap_or_default();
    hasher.update(&json);
    hasher.finalize().to_hex().to_string()
}

/// Texture slots the shader declares for material textures, in declaration
/// order.
fn texture_slots(reflection: &ShaderReflection) -> Vec<(String, u32)> {
    if !reflection.bindings.is_empty() {
        return reflection
            .group(MATERIAL_GROUP)
            .into_iter()
            .filter(|b| b.kind == BindingKind::Texture)
            .map(|b| (b.name.clone(), b.binding))
            .collect();
    }
    reflection
        .samplers
        .iter()
        .filter(|s| !s.shadow)
        .map(|s| (s.name.clone(), s.unit))
        .collect()
}

fn material_block(reflection: &ShaderReflection, data: &MaterialData) -> Option<HostBlock> {
    let binding = reflection
        .group(MATERIAL_GROUP)
        .into_iter()
        .find(|b| b.kind == BindingKind::UniformBuffer)?;
    let mut block = HostBlock::new(binding.layout.clone()?);
    block.set_if_present("color", Vec4::from_array(data.color));
    block.set_if_present("glossiness", data.glossiness);
    Some(block)
}

// ---------------------------------------------------------------------------
// MaterialLib
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MaterialLib {
    by_hash: HashMap<String, Rc<MaterialInstance>>,
    by_name: HashMap<String, Rc<MaterialInstance>>,
    next_id: u32,
}

impl MaterialLib {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build (or find) the material for `data` and register it as `name`.
    ///
    /// Returns `None` when the shader template is unknown. Unknown textures
    /// are skipped.
    pub fn build(
        &mut self,
        shaders: &ShaderLib,
        textures: &TextureLib,
        name: &str,
        data: MaterialData,
        descriptor: Option<MaterialDescriptor>,
    ) -> Option<Rc<MaterialInstance>> {
        let descriptor = descriptor.unwrap_or_default();
        let hash = material_hash(&data, &descriptor);

        if let Some(existing) = self.by_hash.get(&hash).cloned() {
            if existing.name != name {
                tracing::debug!(material = name, instance = %existing.name, "material alias registered");
            }
            self.register_name(name, existing.clone());
            return Some(existing);
        }

        let Some(shader) = shaders.get(&data.base_template) else {
            tracing::warn!(
                material = name,
                template = %data.base_template,
                "material references unknown shader template"
            );
            return None;
        };

        let resolved: Vec<Rc<TextureInstance>> = data
            .textures
            .iter()
            .filter_map(|texture| {
                let found = textures.get(texture);
                if found.is_none() {
                    tracing::warn!(material = name, texture = %texture, "skipping missing texture");
                }
                found
            })
            .collect();

        let slots = texture_slots(&shader.reflection);
        if resolved.len() > slots.len() {
            tracing::warn!(
                material = name,
                textures = resolved.len(),
                slots = slots.len(),
                "material has more textures than its shader samples"
            );
        }
        let texture_bindings = slots
            .into_iter()
            .enumerate()
            .map(|(i, (slot_name, slot))| TextureBinding {
                name: slot_name,
                slot,
                texture: resolved.get(i).cloned(),
            })
            .collect();

        let uniform_block = material_block(&shader.reflection, &data);
        let instance = Rc::new(MaterialInstance {
            id: MaterialId(self.next_id),
            name: name.to_owned(),
            hash: hash.clone(),
            data,
            descriptor,
            shader,
            textures: resolved,
            texture_bindings,
            uniform_block,
        });
        self.next_id += 1;
        tracing::debug!(material = name, id = instance.id.0, "material built");

        self.by_hash.insert(hash, instance.clone());
        self.register_name(name, instance.clone());
        Some(instance)
    }

    fn register_name(&mut self, name: &str, instance: Rc<MaterialInstance>) {
        if let Some(previous) = self.by_name.insert(name.to_owned(), instance.clone()) {
            if !Rc::ptr_eq(&previous, &instance) {
                tracing::warn!(material = name, "material name rebound to a different instance");
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Rc<MaterialInstance>> {
        let found = self.by_name.get(name).cloned();
        if found.is_none() {
            tracing::warn!(material = name, "material not found");
        }
        found
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Number of distinct instances (aliases not counted).
    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}
