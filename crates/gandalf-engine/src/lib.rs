//! Gandalf Engine -- scene graph, asset libraries and batched rendering on top
//! of [`gandalf_ecs`].
//!
//! The engine adds the components a renderable scene needs (transform,
//! camera, light, material, static mesh), the systems that maintain them,
//! deduplicating asset libraries, and a rendering system that groups draws by
//! material and mesh before handing them to a [`RenderDevice`]. The headless
//! device records commands and is always available. The `opengl` and `webgpu`
//! features add GPU devices.
//!
//! # Quick Start
//!
//! ```
//! use gandalf_engine::prelude::*;
//!
//! let mut assets = Assets::new(Backend::Headless);
//! assets.build_material("red", MaterialData::new(builtin::UNLIT).with_color([1.0, 0.0, 0.0, 1.0]), None);
//! let renderer = Renderer::new(HeadlessDevice::new(), assets, RenderSettings::default()).shared();
//!
//! let mut scene = Scene::new("main");
//! register_components(scene.world_mut());
//! register_scene_graph(&mut scene);
//! scene.register_system(StaticMeshRenderingSystem::new(renderer.clone()));
//!
//! for x in [-1.0, 1.0] {
//!     let cube = scene.enroll_entity();
//!     scene.add_component(cube, TransformComponent::from_translation(Vec3::new(x, 0.0, 0.0)));
//!     scene.add_component(cube, MaterialComponent::new("red"));
//!     scene.add_component(cube, StaticMeshComponent::named(primitives::CUBE));
//! }
//!
//! scene.on_create();
//! scene.on_update(1.0 / 60.0);
//! assert_eq!(renderer.borrow().last_stats().draws, 1);
//! assert_eq!(renderer.borrow().last_stats().instances, 2);
//! ```

#![deny(unsafe_code)]

pub mod app;
pub mod assets;
pub mod components;
pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod render;
pub mod systems;

pub use error::{AssetError, ConfigError, EngineError, RenderError};

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use gandalf_ecs::prelude::*;
    pub use glam::{Mat4, Quat, Vec3, Vec4};

    pub use crate::app::{Application, ControlFlow, HeadlessWindow, Window, WindowHandle};
    pub use crate::assets::material::{MaterialData, MaterialDescriptor, MaterialInstance};
    pub use crate::assets::mesh::{primitives, MeshData, MeshLoader};
    pub use crate::assets::shader::{builtin, ShaderSource};
    pub use crate::assets::texture::{TextureData, TextureDescriptor};
    pub use crate::assets::Assets;
    pub use crate::components::{
        register_components, CameraComponent, ComputeComponent, LightComponent, MaterialComponent,
        StaticMeshComponent, TransformComponent,
    };
    pub use crate::config::{Backend, EngineConfig};
    pub use crate::error::{AssetError, ConfigError, EngineError, RenderError};
    pub use crate::event::{Event, EventKind, EventManager};
    pub use crate::logging::init_tracing;
    pub use crate::render::{
        HeadlessDevice, RenderDevice, RenderSettings, Renderer, SharedRenderer, StaticMeshRenderingSystem,
    };
    pub use crate::systems::{register_scene_graph, CameraSystem, ComputeSystem, LinkSystem, TransformSystem};
}
