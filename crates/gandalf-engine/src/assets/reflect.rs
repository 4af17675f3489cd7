//! Shader reflection.
//!
//! WGSL sources go through naga's front-end, so every `@group/@binding`
//! resource, its address space and its full type are read from a real AST.
//! GLSL has no front-end here; a strict declaration parser picks out
//! `uniform` declarations, `std140` blocks and `struct` definitions and
//! rejects anything it does not recognise.
//!
//! Reflection fails open: a source that does not parse yields an empty
//! [`ShaderReflection`] and a debug log line.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::assets::layout::{AddressSpace, BlockLayout, Field, FieldType};

// ---------------------------------------------------------------------------
// Reflection types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingKind {
    UniformBuffer,
    StorageBuffer { read_only: bool },
    Texture,
    DepthTexture,
    Sampler { comparison: bool },
}

impl BindingKind {
    pub fn is_texture(self) -> bool {
        matches!(self, BindingKind::Texture | BindingKind::DepthTexture)
    }
}

/// A bound resource (`@group(g) @binding(b)` or a `std140` block).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectedBinding {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub kind: BindingKind,
    /// Present for uniform and storage buffers.
    pub layout: Option<BlockLayout>,
}

/// A GLSL default-block uniform, flattened to the names `glUniform*` expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LooseUniform {
    pub name: String,
    pub ty: FieldType,
}

/// A GLSL sampler uniform and the texture unit assigned to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplerUniform {
    pub name: String,
    pub unit: u32,
    pub shadow: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShaderReflection {
    pub bindings: Vec<ReflectedBinding>,
    pub uniforms: Vec<LooseUniform>,
    pub samplers: Vec<SamplerUniform>,
    pub entry_points: Vec<(String, ShaderStage)>,
}

impl ShaderReflection {
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty() && self.uniforms.is_empty() && self.samplers.is_empty()
    }

    pub fn binding(&self, name: &str) -> Option<&ReflectedBinding> {
        self.bindings.iter().find(|b| b.name == name)
    }

    /// Bindings of one group, ordered by binding index.
    pub fn group(&self, group: u32) -> Vec<&ReflectedBinding> {
        let mut out: Vec<&ReflectedBinding> =
            self.bindings.iter().filter(|b| b.group == group).collect();
        out.sort_by_key(|b| b.binding);
        out
    }

    pub fn uniform(&self, name: &str) -> Option<&LooseUniform> {
        self.uniforms.iter().find(|u| u.name == name)
    }

    pub fn entry_point(&self, stage: ShaderStage) -> Option<&str> {
        self.entry_points
            .iter()
            .find(|(_, s)| *s == stage)
            .map(|(name, _)| name.as_str())
    }
}

// ---------------------------------------------------------------------------
// WGSL (naga)
// ---------------------------------------------------------------------------

pub fn reflect_wgsl(source: &str) -> ShaderReflection {
    match naga::front::wgsl::parse_str(source) {
        Ok(module) => reflect_module(&module),
        Err(err) => {
            tracing::debug!(error = %err, "WGSL reflection failed -- shader has no reflected uniforms");
            ShaderReflection::default()
        }
    }
}

fn reflect_module(module: &naga::Module) -> ShaderReflection {
    let mut reflection = ShaderReflection::default();
    for (_, var) in module.global_variables.iter() {
        let Some(binding) = var.binding.as_ref() else {
            continue;
        };
        let name = var.name.clone().unwrap_or_default();
        let (kind, layout) = match var.space {
            naga::AddressSpace::Uniform => (
                BindingKind::UniformBuffer,
                block_layout(module, &name, var.ty, AddressSpace::Uniform),
            ),
            naga::AddressSpace::Storage { access } => (
                BindingKind::StorageBuffer {
                    read_only: !access.contains(naga::StorageAccess::STORE),
                },
                block_layout(module, &name, var.ty, AddressSpace::Storage),
            ),
            naga::AddressSpace::Handle => match &module.types[var.ty].inner {
                naga::TypeInner::Image { class, .. } => match class {
                    naga::ImageClass::Depth { .. } => (BindingKind::DepthTexture, None),
                    _ => (BindingKind::Texture, None),
                },
                naga::TypeInner::Sampler { comparison } => (
                    BindingKind::Sampler {
                        comparison: *comparison,
                    },
                    None,
                ),
                _ => continue,
            },
            _ => continue,
        };
        reflection.bindings.push(ReflectedBinding {
            name,
            group: binding.group,
            binding: binding.binding,
            kind,
            layout,
        });
    }
    reflection.bindings.sort_by_key(|b| (b.group, b.binding));

    for entry in &module.entry_points {
        let stage = match entry.stage {
            naga::ShaderStage::Vertex => ShaderStage::Vertex,
            naga::ShaderStage::Fragment => ShaderStage::Fragment,
            naga::ShaderStage::Compute => ShaderStage::Compute,
        };
        reflection.entry_points.push((entry.name.clone(), stage));
    }
    reflection
}

fn block_layout(
    module: &naga::Module,
    name: &str,
    ty: naga::Handle<naga::Type>,
    space: AddressSpace,
) -> Option<BlockLayout> {
    match naga_field_type(module, ty) {
        Some(FieldType::Struct { fields, .. }) => Some(BlockLayout::compute(name, &fields, space)),
        Some(other) => Some(BlockLayout::compute(name, &[Field::new(name, other)], space)),
        None => {
            tracing::debug!(binding = name, "unsupported buffer type -- no layout reflected");
            None
        }
    }
}

fn naga_field_type(module: &naga::Module, ty: naga::Handle<naga::Type>) -> Option<FieldType> {
    use naga::{ScalarKind, TypeInner, VectorSize};

    let scalar = |s: &naga::Scalar| match (s.kind, s.width) {
        (ScalarKind::Float, 4) => Some(FieldType::F32),
        (ScalarKind::Sint, 4) => Some(FieldType::I32),
        (ScalarKind::Uint, 4) => Some(FieldType::U32),
        _ => None,
    };

    let ty_ref = &module.types[ty];
    match &ty_ref.inner {
        TypeInner::Scalar(s) => scalar(s),
        TypeInner::Vector { size, scalar: s } if s.kind == ScalarKind::Float => Some(match size {
            VectorSize::Bi => FieldType::Vec2,
            VectorSize::Tri => FieldType::Vec3,
            VectorSize::Quad => FieldType::Vec4,
        }),
        TypeInner::Matrix {
            columns: VectorSize::Tri,
            rows: VectorSize::Tri,
            ..
        } => Some(FieldType::Mat3),
        TypeInner::Matrix {
            columns: VectorSize::Quad,
            rows: VectorSize::Quad,
            ..
        } => Some(FieldType::Mat4),
        TypeInner::Array { base, size, .. } => {
            let element = naga_field_type(module, *base)?;
            let count = match size {
                naga::ArraySize::Constant(n) => Some(n.get()),
                _ => None,
            };
            Some(FieldType::Array {
                element: Box::new(element),
                count,
            })
        }
        TypeInner::Struct { members, .. } => {
            let fields = members
                .iter()
                .map(|m| {
                    Some(Field::new(
                        m.name.clone().unwrap_or_default(),
                        naga_field_type(module, m.ty)?,
                    ))
                })
                .collect::<Option<Vec<_>>>()?;
            Some(FieldType::Struct {
                name: ty_ref.name.clone().unwrap_or_default(),
                fields,
            })
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// GLSL (strict declaration parser)
// ---------------------------------------------------------------------------

static COMMENTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)//[^\n]*|/\*.*?\*/").expect("valid regex"));

static STRUCT_DEF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"struct\s+(\w+)\s*\{([^}]*)\}\s*;").expect("valid regex")
});

static BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"layout\s*\(\s*std140\s*(?:,\s*binding\s*=\s*(\d+)\s*)?\)\s*uniform\s+(\w+)\s*\{([^}]*)\}\s*(\w+)?\s*;",
    )
    .expect("valid regex")
});

static UNIFORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*uniform\s+(\w+)\s+(\w+)\s*(?:\[\s*(\d+)\s*\])?\s*;").expect("valid regex")
});

static MEMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\w+)\s+(\w+)\s*(?:\[\s*(\d+)\s*\])?\s*$").expect("valid regex")
});

fn glsl_builtin(name: &str) -> Option<FieldType> {
    Some(match name {
        "float" => FieldType::F32,
        "int" | "bool" => FieldType::I32,
        "uint" => FieldType::U32,
        "vec2" => FieldType::Vec2,
        "vec3" => FieldType::Vec3,
        "vec4" => FieldType::Vec4,
        "mat3" => FieldType::Mat3,
        "mat4" => FieldType::Mat4,
        _ => return None,
    })
}

/// Parse `type name[N];` member lists. Returns `None` on any line that is
/// not a plain declaration.
fn parse_members(body: &str, structs: &HashMap<String, FieldType>) -> Option<Vec<Field>> {
    body.split(';')
        .filter(|decl| !decl.trim().is_empty())
        .map(|decl| {
            let caps = MEMBER.captures(decl)?;
            let base = glsl_builtin(&caps[1]).or_else(|| structs.get(&caps[1]).cloned())?;
            let ty = match caps.get(3) {
                Some(n) => FieldType::array(base, n.as_str().parse().ok()?),
                None => base,
            };
            Some(Field::new(&caps[2], ty))
        })
        .collect()
}

/// Flatten a default-block uniform into the names GL reports for it.
fn flatten_loose(name: &str, ty: &FieldType, out: &mut Vec<LooseUniform>) {
    match ty {
        FieldType::Array {
            element,
            count: Some(n),
        } if !element.is_leaf() => {
            for i in 0..*n {
                flatten_loose(&format!("{name}[{i}]"), element, out);
            }
        }
        FieldType::Struct { fields, .. } => {
            for field in fields {
                flatten_loose(&format!("{name}.{}", field.name), &field.ty, out);
            }
        }
        leaf => out.push(LooseUniform {
            name: name.to_owned(),
            ty: leaf.clone(),
        }),
    }
}

/// Reflect a GLSL program from its vertex and fragment sources.
pub fn reflect_glsl(vertex: &str, fragment: &str) -> ShaderReflection {
    let mut reflection = ShaderReflection::default();
    let mut seen = std::collections::HashSet::new();
    let mut next_unit = 0;
    let mut next_block = 0;

    for source in [vertex, fragment] {
        let source = COMMENTS.replace_all(source, "");

        let mut structs: HashMap<String, FieldType> = HashMap::new();
        for caps in STRUCT_DEF.captures_iter(&source) {
            match parse_members(&caps[2], &structs) {
                Some(fields) => {
                    structs.insert(
                        caps[1].to_owned(),
                        FieldType::Struct {
                            name: caps[1].to_owned(),
                            fields,
                        },
                    );
                }
                None => tracing::debug!(name = &caps[1], "unparsed GLSL struct -- skipped"),
            }
        }

        for caps in BLOCK.captures_iter(&source) {
            let block = &caps[2];
            if !seen.insert(format!("block:{block}")) {
                continue;
            }
            let Some(fields) = parse_members(&caps[3], &structs) else {
                tracing::debug!(block, "unparsed std140 block -- skipped");
                continue;
            };
            let binding = match caps.get(1) {
                Some(b) => b.as_str().parse().unwrap_or(next_block),
                None => next_block,
            };
            next_block = next_block.max(binding + 1);
            reflection.bindings.push(ReflectedBinding {
                name: block.to_owned(),
                group: 0,
                binding,
                kind: BindingKind::UniformBuffer,
                layout: Some(BlockLayout::compute(block, &fields, AddressSpace::Uniform)),
            });
        }

        for caps in UNIFORM.captures_iter(&source) {
            let (ty_name, name) = (&caps[1], &caps[2]);
            if !seen.insert(name.to_owned()) {
                continue;
            }
            if ty_name.starts_with("sampler") {
                reflection.samplers.push(SamplerUniform {
                    name: name.to_owned(),
                    unit: next_unit,
                    shadow: ty_name.ends_with("Shadow"),
                });
                next_unit += 1;
                continue;
            }
            let Some(base) = glsl_builtin(ty_name).or_else(|| structs.get(ty_name).cloned()) else {
                tracing::debug!(uniform = name, ty = ty_name, "unknown GLSL uniform type -- skipped");
                continue;
            };
            let ty = match caps.get(3).and_then(|n| n.as_str().parse().ok()) {
                Some(n) => FieldType::array(base, n),
                None => base,
            };
            flatten_loose(name, &ty, &mut reflection.uniforms);
        }
    }

    if reflection.is_empty() {
        tracing::debug!("GLSL reflection found no uniforms");
    }
    reflection
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const WGSL: &str = r#"
struct Light {
    position: vec3<f32>,
    intensity: f32,
    color: vec3<f32>,
}

struct Lights {
    items: array<Light, 4>,
    count: u32,
}

struct Material {
    glossiness: f32,
    color: vec4<f32>,
}

@group(0) @binding(0) var<uniform> lights: Lights;
@group(1) @binding(0) var<uniform> material: Material;
@group(1) @binding(2) var albedo_sampler: sampler;
@group(1) @binding(1) var albedo: texture_2d<f32>;
@group(2) @binding(0) var<storage, read> instances: array<mat4x4<f32>>;

@vertex
fn vs_main(@builtin(vertex_index) i: u32) -> @builtin(position) vec4<f32> {
    return instances[i] * vec4<f32>(lights.items[0].position, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return material.color * textureSample(albedo, albedo_sampler, vec2<f32>(0.0));
}
"#;

    #[test]
    fn wgsl_bindings_are_reflected() {
        let r = reflect_wgsl(WGSL);
        let names: Vec<&str> = r.bindings.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["lights", "material", "albedo", "albedo_sampler", "instances"]);
        assert_eq!(r.binding("albedo").unwrap().kind, BindingKind::Texture);
        assert_eq!(
            r.binding("instances").unwrap().kind,
            BindingKind::StorageBuffer { read_only: true }
        );
        assert_eq!(r.entry_point(ShaderStage::Vertex), Some("vs_main"));
        assert_eq!(r.group(1).len(), 3);
    }

    #[test]
    fn padding_algorithm_matches_naga_offsets() {
        let module = naga::front::wgsl::parse_str(WGSL).unwrap();
        let r = reflect_module(&module);
        for (handle, ty) in module.types.iter() {
            let naga::TypeInner::Struct { members, span } = &ty.inner else {
                continue;
            };
            let Some(FieldType::Struct { fields, .. }) = naga_field_type(&module, handle) else {
                panic!("struct {:?} not converted", ty.name);
            };
            let ours = BlockLayout::compute("s", &fields, AddressSpace::Uniform);
            for m in members {
                let name = m.name.as_deref().unwrap();
                assert_eq!(
                    ours.member_offset(name),
                    Some(m.offset),
                    "offset of {:?}.{name}",
                    ty.name
                );
            }
            assert_eq!(ours.size, *span, "size of {:?}", ty.name);
        }
        let lights = r.binding("lights").unwrap().layout.as_ref().unwrap();
        assert_eq!(lights.field("items[3].color").unwrap().offset, 112);
    }

    #[test]
    fn broken_wgsl_fails_open() {
        let r = reflect_wgsl("@group(0) @binding(0) var<uniform> broken: ;");
        assert!(r.is_empty());
    }

    const GLSL_VS: &str = r#"
#version 410 core
layout(location = 0) in vec3 a_Position;
uniform mat4 u_Model; // per draw
uniform mat4 u_View;
uniform mat4 u_Projection;
"#;

    const GLSL_FS: &str = r#"
#version 410 core
struct Light {
    vec3 position;
    float intensity;
    vec3 color;
};
/* lighting */
uniform Light u_Lights[2];
uniform int u_LightCount;
uniform vec4 u_Color;
uniform sampler2D u_Albedo;
uniform sampler2DShadow u_ShadowMap;
uniform mat4 u_View;
layout(std140, binding = 3) uniform MaterialBlock {
    float glossiness;
    vec4 tint;
} material;
"#;

    #[test]
    fn glsl_uniforms_are_flattened() {
        let r = reflect_glsl(GLSL_VS, GLSL_FS);
        let names: Vec<&str> = r.uniforms.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "u_Model",
                "u_View",
                "u_Projection",
                "u_Lights[0].position",
                "u_Lights[0].intensity",
                "u_Lights[0].color",
                "u_Lights[1].position",
                "u_Lights[1].intensity",
                "u_Lights[1].color",
                "u_LightCount",
                "u_Color",
            ]
        );
        assert_eq!(r.uniform("u_LightCount").unwrap().ty, FieldType::I32);
        assert_eq!(
            r.samplers,
            vec![
                SamplerUniform {
                    name: "u_Albedo".into(),
                    unit: 0,
                    shadow: false
                },
                SamplerUniform {
                    name: "u_ShadowMap".into(),
                    unit: 1,
                    shadow: true
                },
            ]
        );
        let block = r.binding("MaterialBlock").unwrap();
        assert_eq!(block.binding, 3);
        assert_eq!(block.layout.as_ref().unwrap().member_offset("tint"), Some(16));
    }

    #[test]
    fn glsl_unknown_types_are_skipped() {
        let r = reflect_glsl("uniform Mystery u_Thing;", "");
        assert!(r.is_empty());
    }
}
