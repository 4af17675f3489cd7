//! Per-frame uniform data and its mapping onto shader blocks.
//!
//! [`FrameUniforms`] is backend-neutral. WGSL devices copy it into the
//! reflected `camera`, `lights` and `shadow` blocks; OpenGL devices upload it
//! as loose `u_*` uniforms.

use glam::{Mat4, Vec3};

use crate::assets::layout::{HostBlock, UniformValue};
use crate::assets::material::MaterialInstance;

pub const CAMERA_BLOCK: &str = "camera";
pub const LIGHTS_BLOCK: &str = "lights";
pub const SHADOW_BLOCK: &str = "shadow";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightUniform {
    pub position: Vec3,
    pub intensity: f32,
    pub color: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameUniforms {
    pub view: Mat4,
    pub projection: Mat4,
    pub camera_position: Vec3,
    pub lights: Vec<LightUniform>,
    /// View-projection of the shadow-casting light.
    pub light_space: Mat4,
    pub shadows_enabled: bool,
}

impl Default for FrameUniforms {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            camera_position: Vec3::ZERO,
            lights: Vec::new(),
            light_space: Mat4::IDENTITY,
            shadows_enabled: false,
        }
    }
}

impl FrameUniforms {
    /// Write the members of the frame-level block named `block_name`.
    ///
    /// Members the block does not declare are skipped, so shaders may use a
    /// subset of each block.
    pub fn fill_block(&self, block_name: &str, block: &mut HostBlock) {
        match block_name {
            CAMERA_BLOCK => {
                block.set_if_present("view", self.view);
                block.set_if_present("projection", self.projection);
                block.set_if_present("position", self.camera_position);
            }
            LIGHTS_BLOCK => {
                block.clear();
                for (i, light) in self.lights.iter().enumerate() {
                    block.set_if_present(&format!("items[{i}].position"), light.position);
                    block.set_if_present(&format!("items[{i}].intensity"), light.intensity);
                    block.set_if_present(&format!("items[{i}].color"), light.color);
                }
                block.set_if_present("count", self.lights.len() as u32);
            }
            SHADOW_BLOCK => {
                block.set_if_present("light_view_projection", self.light_space);
                block.set_if_present("enabled", u32::from(self.shadows_enabled));
            }
            other => tracing::debug!(block = other, "no frame data for block"),
        }
    }

    /// Loose GLSL uniforms for this frame, by uniform name.
    pub fn gl_uniforms(&self) -> Vec<(String, UniformValue)> {
        let mut out = vec![
            ("u_View".to_owned(), self.view.into()),
            ("u_Projection".to_owned(), self.projection.into()),
            ("u_LightSpace".to_owned(), self.light_space.into()),
            ("u_CameraPosition".to_owned(), self.camera_position.into()),
            ("u_LightCount".to_owned(), (self.lights.len() as i32).into()),
            ("u_ShadowsEnabled".to_owned(), i32::from(self.shadows_enabled).into()),
        ];
        for (i, light) in self.lights.iter().enumerate() {
            out.push((format!("u_Lights[{i}].position"), light.position.into()));
            out.push((format!("u_Lights[{i}].intensity"), light.intensity.into()));
            out.push((format!("u_Lights[{i}].color"), light.color.into()));
        }
        out
    }
}

/// Loose GLSL uniforms carried by a material.
pub fn material_gl_uniforms(material: &MaterialInstance) -> [(&'static str, UniformValue); 2] {
    [
        ("u_Color", material.color().into()),
        ("u_Glossiness", material.glossiness().into()),
    ]
}

/// View-projection used to render the shadow map from `light_position`,
/// looking at the origin.
pub fn light_view_projection(light_position: Vec3) -> Mat4 {
    let up = if light_position.normalize_or_zero().abs().y > 0.99 {
        Vec3::Z
    } else {
        Vec3::Y
    };
    let view = Mat4::look_at_rh(light_position, Vec3::ZERO, up);
    let projection = Mat4::orthographic_rh(-20.0, 20.0, -20.0, 20.0, 0.1, 100.0);
    projection * view
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::shader::{builtin, ShaderLib};
    use crate::config::Backend;

    fn block(shader: &str, name: &str) -> HostBlock {
        let shaders = ShaderLib::with_builtins(Backend::WebGpu);
        let shader = shaders.get(shader).unwrap();
        let layout = shader.reflection.binding(name).unwrap().layout.clone().unwrap();
        HostBlock::new(layout)
    }

    fn f32_at(block: &HostBlock, offset: usize) -> f32 {
        f32::from_ne_bytes(block.bytes()[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn lights_land_at_padded_offsets() {
        let frame = FrameUniforms {
            lights: vec![
                LightUniform {
                    position: Vec3::new(1.0, 2.0, 3.0),
                    intensity: 0.5,
                    color: Vec3::ONE,
                },
                LightUniform {
                    position: Vec3::new(4.0, 5.0, 6.0),
                    intensity: 2.0,
                    color: Vec3::X,
                },
            ],
            ..Default::default()
        };
        let mut lights = block(builtin::BLINN_PHONG, LIGHTS_BLOCK);
        frame.fill_block(LIGHTS_BLOCK, &mut lights);

        // Light is 32 bytes: vec3 + f32, then vec3 padded to 16.
        assert_eq!(f32_at(&lights, 12), 0.5);
        assert_eq!(f32_at(&lights, 32), 4.0);
        assert_eq!(f32_at(&lights, 44), 2.0);
        assert_eq!(&lights.bytes()[128..132], &2u32.to_ne_bytes());
    }

    #[test]
    fn camera_block_receives_position() {
        let frame = FrameUniforms {
            camera_position: Vec3::new(7.0, 8.0, 9.0),
            ..Default::default()
        };
        let mut camera = block(builtin::UNLIT, CAMERA_BLOCK);
        frame.fill_block(CAMERA_BLOCK, &mut camera);
        assert_eq!(f32_at(&camera, 128), 7.0);
    }

    #[test]
    fn gl_uniform_names_match_templates() {
        let shaders = ShaderLib::with_builtins(Backend::OpenGl);
        let phong = shaders.get(builtin::BLINN_PHONG).unwrap();
        let frame = FrameUniforms {
            lights: vec![LightUniform {
                position: Vec3::ZERO,
                intensity: 1.0,
                color: Vec3::ONE,
            }],
            ..Default::default()
        };
        for (name, value) in frame.gl_uniforms() {
            let declared = phong.reflection.uniform(&name);
            assert!(declared.is_some(), "{name} not declared");
            assert_eq!(declared.unwrap().ty, value.field_type(), "{name}");
        }
    }
}
