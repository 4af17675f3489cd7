//! A grid of spinning cubes lit by one light, rendered through the headless
//! device.
//!
//! ```text
//! cargo run -p gandalf-engine --example spinning_cubes [config.json]
//! ```

use anyhow::Context;
use gandalf_engine::prelude::*;

/// Rotates every transform that is not static.
struct SpinSystem {
    base: SystemBase,
    degrees_per_second: f32,
}

impl System for SpinSystem {
    fn base(&self) -> &SystemBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut SystemBase {
        &mut self.base
    }

    fn on_update_entity(&mut self, world: &mut World, ts: f32, entity: Entity) {
        if let Some(transform) = world.get_component_mut::<TransformComponent>(entity) {
            if !transform.is_static {
                transform.rotation.y += self.degrees_per_second * ts;
            }
        }
    }
}

fn build_scene(config: &EngineConfig, renderer: SharedRenderer<HeadlessDevice>) -> Scene {
    let mut scene = Scene::new("spinning_cubes");
    register_components(scene.world_mut());
    scene.register_system(SpinSystem {
        base: SystemBase::with_filter::<(TransformComponent,)>("spin"),
        degrees_per_second: 90.0,
    });
    register_scene_graph(&mut scene);
    scene.register_system(StaticMeshRenderingSystem::new(renderer));

    let camera = scene.enroll_entity();
    scene.add_component(camera, TransformComponent::from_translation(Vec3::new(0.0, 4.0, 12.0)).with_static(true));
    scene.add_component(
        camera,
        CameraComponent::perspective(60.0, config.aspect_ratio(), 0.1, 100.0),
    );

    let light = scene.enroll_entity();
    scene.add_component(light, TransformComponent::from_translation(Vec3::new(4.0, 8.0, 4.0)).with_static(true));
    scene.add_component(light, LightComponent::default());

    let floor = scene.enroll_entity();
    scene.add_component(
        floor,
        TransformComponent::new(Vec3::new(0.0, -1.0, 0.0), Vec3::ZERO, Vec3::splat(20.0)).with_static(true),
    );
    scene.add_component(floor, MaterialComponent::new("floor"));
    scene.add_component(floor, StaticMeshComponent::named(primitives::PLANE));

    for x in -2..=2 {
        for z in -2..=2 {
            let cube = scene.enroll_entity();
            let material = if (x + z) % 2 == 0 { "orange" } else { "blue" };
            scene.add_component(
                cube,
                TransformComponent::from_translation(Vec3::new(x as f32 * 2.0, 0.0, z as f32 * 2.0)),
            );
            scene.add_component(cube, MaterialComponent::new(material));
            scene.add_component(cube, StaticMeshComponent::named(primitives::CUBE));
        }
    }
    scene
}

fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_path(&path).with_context(|| format!("loading {path}"))?,
        None => EngineConfig::default(),
    };
    init_tracing(&config.log_filter);

    let mut assets = Assets::new(Backend::Headless);
    let lit = |color| MaterialData::new(builtin::BLINN_PHONG).with_color(color).with_glossiness(32.0);
    assets.build_material("orange", lit([1.0, 0.5, 0.1, 1.0]), None);
    assets.build_material("blue", lit([0.2, 0.4, 1.0, 1.0]), None);
    assets.build_material(
        "floor",
        MaterialData::new(builtin::BLINN_PHONG).with_color([0.6, 0.6, 0.6, 1.0]),
        Some(MaterialDescriptor {
            cast_shadows: false,
            ..MaterialDescriptor::default()
        }),
    );
    let renderer = Renderer::new(HeadlessDevice::new(), assets, RenderSettings::from(&config)).shared();

    let app = Application::<HeadlessWindow>::run_or_exit(config, |app| {
        let scene = build_scene(app.config(), renderer.clone());
        app.scenes_mut().add_scene(scene);
        Ok(())
    });

    let stats = renderer.borrow().last_stats();
    let run = app.stats();
    println!(
        "{} frames in {:.2} ms: {} draws, {} shadow draws, {} instances, {} lights per frame",
        run.frames,
        run.total_time.as_secs_f64() * 1000.0,
        stats.draws,
        stats.shadow_draws,
        stats.instances,
        stats.lights,
    );
    anyhow::ensure!(stats.instances == 26, "expected 26 instances, drew {}", stats.instances);
    Ok(())
}
