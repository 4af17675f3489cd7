//! Error types for the engine crate.
//!
//! Asset lookups that can simply miss return `Option` and log; the enums here
//! cover failures the caller has to decide about (bad configuration, device
//! creation, invalid geometry).

use std::path::PathBuf;

use crate::assets::layout::UniformError;

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("mesh '{name}' has mismatched attribute lengths: {details}")]
    InvalidMesh { name: String, details: String },

    #[error("mesh loader failed for '{path}': {details}")]
    Loader { path: PathBuf, details: String },

    #[error("texture '{name}' expects {expected} bytes of pixel data, got {actual}")]
    TextureSize {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("shader '{0}' is not registered")]
    UnknownShader(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("no suitable GPU adapter found")]
    NoAdapter,

    #[error("failed to create GPU device: {0}")]
    Device(String),

    #[error("shader '{name}' failed to compile: {log}")]
    ShaderCompile { name: String, log: String },

    #[error("shader program '{name}' failed to link: {log}")]
    ProgramLink { name: String, log: String },

    #[error("GPU validation failed for '{what}': {log}")]
    Validation { what: String, log: String },

    #[error("compute job '{0}' has no input data")]
    EmptyComputeInput(String),

    #[error("GPU read-back failed: {0}")]
    Readback(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Umbrella error returned by application start-up.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Uniform(#[from] UniformError),

    #[error(transparent)]
    Ecs(#[from] gandalf_ecs::EcsError),

    #[error("window creation failed: {0}")]
    Window(String),
}
