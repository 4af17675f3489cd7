//! Shader library.
//!
//! Shaders are cached by name. Building a shader reflects its source once;
//! the device compiles it lazily the first time a material using it is
//! prepared.

use std::collections::HashMap;
use std::rc::Rc;

use crate::assets::reflect::{reflect_glsl, reflect_wgsl, ShaderReflection};
use crate::config::Backend;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderSource {
    Wgsl(String),
    Glsl { vertex: String, fragment: String },
}

impl ShaderSource {
    pub fn reflect(&self) -> ShaderReflection {
        match self {
            ShaderSource::Wgsl(source) => reflect_wgsl(source),
            ShaderSource::Glsl { vertex, fragment } => reflect_glsl(vertex, fragment),
        }
    }

    fn content_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        match self {
            ShaderSource::Wgsl(source) => {
                hasher.update(b"wgsl\0");
                hasher.update(source.as_bytes());
            }
            ShaderSource::Glsl { vertex, fragment } => {
                hasher.update(b"glsl\0");
                hasher.update(vertex.as_bytes());
                hasher.update(b"\0");
                hasher.update(fragment.as_bytes());
            }
        }
        hasher.finalize().to_hex().to_string()
    }
}

#[derive(Debug)]
pub struct ShaderInstance {
    pub name: String,
    pub source: ShaderSource,
    pub reflection: ShaderReflection,
    /// BLAKE3 of the source text.
    pub hash: String,
}

// ---------------------------------------------------------------------------
// Built-in templates
// ---------------------------------------------------------------------------

pub mod builtin {
    use super::ShaderSource;
    use crate::config::Backend;

    pub const UNLIT: &str = "unlit";
    pub const BLINN_PHONG: &str = "blinn_phong";
    pub const SHADOW_DEPTH: &str = "shadow_depth";

    pub const ALL: [&str; 3] = [UNLIT, BLINN_PHONG, SHADOW_DEPTH];

    /// Source of a built-in template in the language `backend` consumes.
    pub fn source(name: &str, backend: Backend) -> Option<ShaderSource> {
        let glsl = |vertex: &str, fragment: &str| ShaderSource::Glsl {
            vertex: vertex.to_owned(),
            fragment: fragment.to_owned(),
        };
        let wgsl = |text: &str| ShaderSource::Wgsl(text.to_owned());
        Some(match (name, backend.uses_wgsl()) {
            (UNLIT, true) => wgsl(include_str!("shaders/unlit.wgsl")),
            (BLINN_PHONG, true) => wgsl(include_str!("shaders/blinn_phong.wgsl")),
            (SHADOW_DEPTH, true) => wgsl(include_str!("shaders/shadow_depth.wgsl")),
            (UNLIT, false) => glsl(
                include_str!("shaders/unlit.vert"),
                include_str!("shaders/unlit.frag"),
            ),
            (BLINN_PHONG, false) => glsl(
                include_str!("shaders/blinn_phong.vert"),
                include_str!("shaders/blinn_phong.frag"),
            ),
            (SHADOW_DEPTH, false) => glsl(
                include_str!("shaders/shadow_depth.vert"),
                include_str!("shaders/shadow_depth.frag"),
            ),
            _ => return None,
        })
    }
}

// ---------------------------------------------------------------------------
// ShaderLib
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ShaderLib {
    shaders: HashMap<String, Rc<ShaderInstance>>,
}

impl ShaderLib {
    pub fn new() -> Self {
        Self::default()
    }

    /// A library preloaded with the built-in templates for `backend`.
    pub fn with_builtins(backend: Backend) -> Self {
        let mut lib = Self::new();
        for name in builtin::ALL {
            if let Some(source) = builtin::source(name, backend) {
                lib.build(name, source);
            }
        }
        lib
    }

    /// Register `source` under `name`.
    ///
    /// An existing name returns the cached instance; the new source is
    /// ignored.
    pub fn build(&mut self, name: &str, source: ShaderSource) -> Rc<ShaderInstance> {
        if let Some(existing) = self.shaders.get(name) {
            if existing.source != source {
                tracing::warn!(shader = name, "shader already built with different source -- keeping cached");
            }
            return existing.clone();
        }
        let reflection = source.reflect();
        tracing::debug!(
            shader = name,
            bindings = reflection.bindings.len(),
            uniforms = reflection.uniforms.len(),
            "shader reflected"
        );
        let instance = Rc::new(ShaderInstance {
            name: name.to_owned(),
            hash: source.content_hash(),
            source,
            reflection,
        });
        self.shaders.insert(name.to_owned(), instance.clone());
        instance
    }

    pub fn get(&self, name: &str) -> Option<Rc<ShaderInstance>> {
        let found = self.shaders.get(name).cloned();
        if found.is_none() {
            tracing::warn!(shader = name, "shader not found");
        }
        found
    }

    pub fn contains(&self, name: &str) -> bool {
        self.shaders.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.shaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shaders.is_empty()
    }
}
