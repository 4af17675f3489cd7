//! ECS throughput benchmarks.
//!
//! Measures the two paths that dominate a frame: structural churn (adding and
//! removing components, which updates every interested system cache) and the
//! steady-state update pass over cached entities.
//!
//! Run with: `cargo bench --bench ecs_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use gandalf_ecs::prelude::*;

// ---------------------------------------------------------------------------
// Benchmark component types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, PartialEq)]
struct Velocity {
    dx: f32,
    dy: f32,
}

#[derive(Debug, Clone, PartialEq)]
struct Frozen;

struct Integrate {
    base: SystemBase,
}

impl System for Integrate {
    fn base(&self) -> &SystemBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut SystemBase {
        &mut self.base
    }
    fn on_update_entity(&mut self, world: &mut World, ts: f32, entity: Entity) {
        let Some(v) = world.get_component::<Velocity>(entity).cloned() else {
            return;
        };
        if let Some(p) = world.get_component_mut::<Position>(entity) {
            p.x += v.dx * ts;
            p.y += v.dy * ts;
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn setup_scene(entity_count: usize) -> (Scene, Vec<Entity>) {
    let mut scene = Scene::new("bench");
    scene.register_system(Integrate {
        base: SystemBase::with_filter::<(Position, Velocity)>("integrate"),
    });
    scene.register_system(Integrate {
        base: SystemBase::with_filter::<(Position, Frozen)>("frozen"),
    });
    let entities = (0..entity_count)
        .map(|i| {
            let e = scene.enroll_entity();
            scene.add_component(e, Position { x: i as f32, y: 0.0 });
            scene.add_component(e, Velocity { dx: 1.0, dy: 0.5 });
            e
        })
        .collect();
    scene.on_create();
    (scene, entities)
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("scene_update");
    for count in [1_000usize, 10_000] {
        let (mut scene, _) = setup_scene(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| scene.on_update(black_box(0.016)));
        });
    }
    group.finish();
}

fn bench_structural_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter_churn");
    for count in [1_000usize, 10_000] {
        let (mut scene, entities) = setup_scene(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                for &e in entities.iter().step_by(10) {
                    scene.add_component(e, Frozen);
                }
                for &e in entities.iter().step_by(10) {
                    black_box(scene.remove_component::<Frozen>(e));
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_update, bench_structural_churn);
criterion_main!(benches);
