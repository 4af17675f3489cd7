//! Asset libraries: shaders, textures, materials and meshes.
//!
//! Every library hands out shared `Rc` instances. Components refer to assets
//! by name; the rendering system resolves the names once, when an entity is
//! first created.

pub mod layout;
pub mod material;
pub mod mesh;
pub mod reflect;
pub mod shader;
pub mod texture;

use std::rc::Rc;

use crate::config::Backend;
use material::{MaterialData, MaterialDescriptor, MaterialInstance, MaterialLib};
use mesh::MeshLib;
use shader::ShaderLib;
use texture::TextureLib;

/// The four libraries, owned together.
#[derive(Debug)]
pub struct Assets {
    pub backend: Backend,
    pub shaders: ShaderLib,
    pub textures: TextureLib,
    pub materials: MaterialLib,
    pub meshes: MeshLib,
}

impl Assets {
    /// Libraries preloaded with the built-in shader templates for `backend`
    /// and the primitive meshes.
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            shaders: ShaderLib::with_builtins(backend),
            textures: TextureLib::new(),
            materials: MaterialLib::new(),
            meshes: MeshLib::with_primitives(),
        }
    }

    /// [`MaterialLib::build`] against this bundle's shaders and textures.
    pub fn build_material(
        &mut self,
        name: &str,
        data: MaterialData,
        descriptor: Option<MaterialDescriptor>,
    ) -> Option<Rc<MaterialInstance>> {
        self.materials
            .build(&self.shaders, &self.textures, name, data, descriptor)
    }
}
