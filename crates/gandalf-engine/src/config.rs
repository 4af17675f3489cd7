//! Engine configuration.
//!
//! [`EngineConfig`] is plain serde data so it can live in a JSON file next to
//! the application. Every field has a default; a partial file only overrides
//! the fields it names.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Which rendering backend an application drives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Records device commands without touching a GPU.
    #[default]
    Headless,
    #[serde(rename = "opengl")]
    OpenGl,
    #[serde(rename = "webgpu")]
    WebGpu,
}

impl Backend {
    /// Whether shaders for this backend are written in WGSL (otherwise GLSL).
    pub fn uses_wgsl(self) -> bool {
        !matches!(self, Backend::OpenGl)
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub backend: Backend,
    pub window_title: String,
    pub width: u32,
    pub height: u32,
    /// Linear RGBA.
    pub clear_color: [f32; 4],
    /// Run the shadow pre-pass for shadow-casting materials.
    pub shadows: bool,
    /// Edge length of the square shadow map, in texels.
    pub shadow_map_size: u32,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Frames run by the headless window before it closes.
    pub headless_frames: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Headless,
            window_title: "gandalf".to_owned(),
            width: 1280,
            height: 720,
            clear_color: [0.1, 0.1, 0.1, 1.0],
            shadows: true,
            shadow_map_size: 2048,
            log_filter: "info".to_owned(),
            headless_frames: 60,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&text)?;
        tracing::info!(path = %path.display(), backend = ?config.backend, "loaded engine config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid {
                field: "width/height",
                reason: format!("window size must be non-zero, got {}x{}", self.width, self.height),
            });
        }
        if !self.shadow_map_size.is_power_of_two() {
            return Err(ConfigError::Invalid {
                field: "shadow_map_size",
                reason: format!("must be a power of two, got {}", self.shadow_map_size),
            });
        }
        if self.clear_color.iter().any(|c| !c.is_finite()) {
            return Err(ConfigError::Invalid {
                field: "clear_color",
                reason: "components must be finite".to_owned(),
            });
        }
        Ok(())
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height as f32
    }
}
