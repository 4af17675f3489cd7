//! Texture library.
//!
//! Textures are keyed by name. Each new texture takes the next free slot,
//! which the OpenGL backend uses as its texture unit.

use std::collections::HashMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::AssetError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureFormat {
    Rgba8,
    R8,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            TextureFormat::Rgba8 => 4,
            TextureFormat::R8 => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TextureFilter {
    #[default]
    Linear,
    Nearest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TextureWrap {
    #[default]
    Repeat,
    ClampToEdge,
    MirroredRepeat,
}

/// Sampling parameters of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TextureDescriptor {
    pub filter: TextureFilter,
    pub wrap: TextureWrap,
    pub mipmaps: bool,
}

/// Raw, decoded pixel data. Image decoding happens outside the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub pixels: Vec<u8>,
}

impl TextureData {
    /// A 1x1 RGBA texture.
    pub fn solid(rgba: [u8; 4]) -> Self {
        Self {
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8,
            pixels: rgba.to_vec(),
        }
    }

    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    pub fn validate(&self, name: &str) -> Result<(), AssetError> {
        let expected = self.expected_len();
        if self.pixels.len() != expected {
            return Err(AssetError::TextureSize {
                name: name.to_owned(),
                expected,
                actual: self.pixels.len(),
            });
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct TextureInstance {
    pub name: String,
    pub slot: u32,
    pub data: TextureData,
    pub descriptor: TextureDescriptor,
}

// ---------------------------------------------------------------------------
// TextureLib
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct TextureLib {
    textures: HashMap<String, Rc<TextureInstance>>,
    next_slot: u32,
}

impl TextureLib {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `data` under `name`.
    ///
    /// Rebuilding an existing name returns the cached instance untouched.
    pub fn build(
        &mut self,
        name: &str,
        data: TextureData,
        descriptor: Option<TextureDescriptor>,
    ) -> Result<Rc<TextureInstance>, AssetError> {
        if let Some(existing) = self.textures.get(name) {
            tracing::debug!(texture = name, "texture cached, skipping upload");
            return Ok(existing.clone());
        }
        data.validate(name)?;

        let instance = Rc::new(TextureInstance {
            name: name.to_owned(),
            slot: self.next_slot,
            data,
            descriptor: descriptor.unwrap_or_default(),
        });
        self.next_slot += 1;
        tracing::debug!(
            texture = name,
            slot = instance.slot,
            width = instance.data.width,
            height = instance.data.height,
            "texture built"
        );
        self.textures.insert(name.to_owned(), instance.clone());
        Ok(instance)
    }

    pub fn get(&self, name: &str) -> Option<Rc<TextureInstance>> {
        let found = self.textures.get(name).cloned();
        if found.is_none() {
            tracing::warn!(texture = name, "texture not found");
        }
        found
    }

    pub fn contains(&self, name: &str) -> bool {
        self.textures.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebuild_returns_cached_instance() {
        let mut lib = TextureLib::new();
        let a = lib.build("white", TextureData::solid([255; 4]), None).unwrap();
        let b = lib
            .build("white", TextureData::solid([0, 0, 0, 255]), None)
            .unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(b.data.pixels, vec![255; 4]);
        assert_eq!(lib.len(), 1);
    }

    #[test]
    fn slots_are_assigned_in_build_order() {
        let mut lib = TextureLib::new();
        let a = lib.build("a", TextureData::solid([1; 4]), None).unwrap();
        let b = lib.build("b", TextureData::solid([2; 4]), None).unwrap();
        assert_eq!((a.slot, b.slot), (0, 1));
    }

    #[test]
    fn wrong_pixel_count_is_rejected() {
        let mut lib = TextureLib::new();
        let data = TextureData {
            width: 2,
            height: 2,
            format: TextureFormat::Rgba8,
            pixels: vec![0; 4],
        };
        let err = lib.build("bad", data, None).unwrap_err();
        assert!(matches!(
            err,
            AssetError::TextureSize {
                expected: 16,
                actual: 4,
                ..
            }
        ));
        assert!(!lib.contains("bad"));
    }
}
