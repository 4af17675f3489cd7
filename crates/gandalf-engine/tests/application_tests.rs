//! Application loop, events, configuration and asset library behavior.

use std::cell::RefCell;
use std::rc::Rc;

use gandalf_engine::assets::texture::TextureLib;
use gandalf_engine::prelude::*;

// ---------------------------------------------------------------------------
// Test systems
// ---------------------------------------------------------------------------

/// Records the name of its scene every update and requests a scene change on
/// the first one.
struct Recorder {
    base: SystemBase,
    label: &'static str,
    log: Rc<RefCell<Vec<&'static str>>>,
    switch_to: Option<(SceneChanger, SceneId)>,
}

impl System for Recorder {
    fn base(&self) -> &SystemBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut SystemBase {
        &mut self.base
    }

    fn on_update_system(&mut self, _world: &mut World, _ts: f32) {
        self.log.borrow_mut().push(self.label);
        if let Some((changer, target)) = self.switch_to.take() {
            changer.request(target);
            // Still inside this scene's update: the change must not apply yet.
            self.log.borrow_mut().push(self.label);
        }
    }
}

fn headless(frames: u32) -> EngineConfig {
    EngineConfig {
        headless_frames: frames,
        ..EngineConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Application + events
// ---------------------------------------------------------------------------

#[test]
fn scene_change_requested_mid_update_applies_next_frame() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut app = Application::<HeadlessWindow>::new(headless(3)).unwrap();

    let b_id = SceneId(1);
    let changer = app.scenes().changer();
    let mut a = Scene::new("a");
    a.register_system(Recorder {
        base: SystemBase::new("rec", Vec::new()),
        label: "a",
        log: log.clone(),
        switch_to: Some((changer, b_id)),
    });
    let mut b = Scene::new("b");
    b.register_system(Recorder {
        base: SystemBase::new("rec", Vec::new()),
        label: "b",
        log: log.clone(),
        switch_to: None,
    });
    app.scenes_mut().add_scene(a);
    assert_eq!(app.scenes_mut().add_scene(b), b_id);

    let changes = Rc::new(RefCell::new(Vec::new()));
    let sink = changes.clone();
    app.events_mut().attach(EventKind::SceneChange, move |e| sink.borrow_mut().push(e.clone()));
    app.run();

    assert_eq!(*log.borrow(), vec!["a", "a", "b", "b"]);
    assert_eq!(app.scenes().active_scene_id(), Some(b_id));
    assert_eq!(changes.borrow().len(), 1);
}

#[test]
fn system_state_changes_surface_as_events() {
    let mut events = EventManager::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    events.attach(EventKind::SystemStateChange, move |e| sink.borrow_mut().push(e.clone()));

    let mut scene = Scene::new("main");
    register_scene_graph(&mut scene);
    assert!(events.connect_system(&mut scene, "transform"));
    assert!(!events.connect_system(&mut scene, "missing"));
    scene.on_create();
    scene.set_system_state("transform", SystemState::Pause);
    events.dispatch_pending();

    let states: Vec<(SystemState, SystemState)> = seen
        .borrow()
        .iter()
        .filter_map(|e| match e {
            Event::SystemStateChange(c) => Some((c.previous, c.current)),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            (SystemState::None, SystemState::Play),
            (SystemState::Play, SystemState::Pause)
        ]
    );
}

#[test]
fn run_or_exit_returns_app_after_setup() {
    let app = Application::<HeadlessWindow>::run_or_exit(headless(2), |app| {
        app.scenes_mut().add_scene(Scene::new("only"));
        Ok(())
    });
    assert_eq!(app.stats().frames, 2);
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[test]
fn partial_config_file_keeps_defaults() {
    let path = std::env::temp_dir().join(format!("gandalf_config_{}.json", std::process::id()));
    std::fs::write(&path, r#"{ "backend": "webgpu", "shadows": false }"#).unwrap();
    let config = EngineConfig::from_path(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(config.backend, Backend::WebGpu);
    assert!(!config.shadows);
    assert_eq!(config.shadow_map_size, EngineConfig::default().shadow_map_size);
}

#[test]
fn bad_config_values_are_reported() {
    let err = EngineConfig::from_json_str(r#"{ "shadow_map_size": 1000 }"#).unwrap_err();
    assert!(err.to_string().contains("shadow_map_size"));
    assert!(matches!(
        EngineConfig::from_path("/definitely/not/here.json"),
        Err(ConfigError::Io { .. })
    ));
}

// ---------------------------------------------------------------------------
// Asset libraries
// ---------------------------------------------------------------------------

fn with_textures() -> Assets {
    let mut assets = Assets::new(Backend::Headless);
    let textures: &mut TextureLib = &mut assets.textures;
    textures.build("white", TextureData::solid([255; 4]), None).unwrap();
    textures.build("black", TextureData::solid([0, 0, 0, 255]), None).unwrap();
    assets
}

#[test]
fn equal_material_data_shares_one_instance() {
    let mut assets = with_textures();
    let a = assets
        .build_material("a", MaterialData::new(builtin::UNLIT).with_texture("white"), None)
        .unwrap();
    let b = assets
        .build_material("b", MaterialData::new(builtin::UNLIT).with_texture("white"), None)
        .unwrap();
    assert!(Rc::ptr_eq(&a, &b));
    assert_eq!(assets.materials.len(), 1);
    assert!(assets.materials.contains("a") && assets.materials.contains("b"));
}

#[test]
fn different_texture_or_descriptor_builds_a_new_instance() {
    let mut assets = with_textures();
    let white = assets
        .build_material("w", MaterialData::new(builtin::UNLIT).with_texture("white"), None)
        .unwrap();
    let black = assets
        .build_material("k", MaterialData::new(builtin::UNLIT).with_texture("black"), None)
        .unwrap();
    let wire = assets
        .build_material(
            "w_lines",
            MaterialData::new(builtin::UNLIT).with_texture("white"),
            Some(MaterialDescriptor {
                cull: gandalf_engine::assets::material::CullMode::None,
                ..MaterialDescriptor::default()
            }),
        )
        .unwrap();
    assert!(!Rc::ptr_eq(&white, &black));
    assert!(!Rc::ptr_eq(&white, &wire));
    assert_ne!(white.id, black.id);
    assert_eq!(assets.materials.len(), 3);
}

#[test]
fn unknown_template_yields_none() {
    let mut assets = Assets::new(Backend::Headless);
    assert!(assets.build_material("x", MaterialData::new("toon"), None).is_none());
    assert!(assets.materials.get("x").is_none());
}

#[test]
fn missing_texture_falls_back_to_empty_binding() {
    let mut assets = Assets::new(Backend::Headless);
    let m = assets
        .build_material("m", MaterialData::new(builtin::UNLIT).with_texture("ghost"), None)
        .unwrap();
    assert!(m.textures.is_empty());
    assert!(m.texture_bindings.iter().all(|b| b.texture.is_none()));
}

#[test]
fn inline_mesh_with_identical_data_is_deduplicated() {
    let mut assets = Assets::new(Backend::Headless);
    let a = assets.meshes.build("quad_a", primitives::quad()).unwrap();
    let b = assets.meshes.build("quad_b", primitives::quad()).unwrap();
    assert!(Rc::ptr_eq(&a, &b));
    let broken = MeshData {
        vertices: vec![[0.0; 3]; 3],
        normals: vec![[0.0; 3]; 2],
        uvs: vec![[0.0; 2]; 3],
        indices: vec![],
    };
    assert!(assets.meshes.build("broken", broken).is_err());
}

fn same_bytes_split_across_arrays() -> (MeshData, MeshData) {
    let one_vertex = MeshData {
        vertices: vec![[1.0, 2.0, 3.0]],
        normals: vec![[4.0, 5.0, 6.0]],
        uvs: vec![[7.0, 8.0]],
        indices: vec![0; 24],
    };
    let four_vertices = MeshData {
        vertices: vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 0.0], [0.0; 3]],
        normals: vec![[0.0; 3]; 4],
        uvs: vec![[0.0; 2]; 4],
        indices: vec![],
    };
    (one_vertex, four_vertices)
}

#[test]
fn meshes_with_different_arrays_are_distinct_instances() {
    let mut assets = Assets::new(Backend::Headless);
    let (one, four) = same_bytes_split_across_arrays();
    let a = assets.meshes.build("one", one).unwrap();
    let b = assets.meshes.build("four", four).unwrap();
    assert!(!Rc::ptr_eq(&a, &b));
    assert_ne!(a.hash, b.hash);
    assert_eq!(b.data.vertex_count(), 4);
    assert!(!b.data.is_indexed());
}
