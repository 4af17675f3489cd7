//! Property tests for system filter caches.
//!
//! Random sequences of structural operations are applied to a scene with a
//! few systems registered; after every operation each system's cache must hold
//! exactly the live entities that own every filtered component type.

use std::collections::HashSet;

use gandalf_ecs::prelude::*;
use proptest::prelude::*;

#[derive(Debug, Clone, PartialEq)]
struct Pos(i32);

#[derive(Debug, Clone, PartialEq)]
struct Vel(i32);

#[derive(Debug, Clone, PartialEq)]
struct Tag;

struct Filtered {
    base: SystemBase,
}

impl System for Filtered {
    fn base(&self) -> &SystemBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut SystemBase {
        &mut self.base
    }
    fn on_update_entity(&mut self, world: &mut World, _ts: f32, entity: Entity) {
        // Mutating structure from inside a hook must keep caches exact.
        if world.has_component::<Tag>(entity) {
            world.remove_component::<Tag>(entity);
        }
    }
}

#[derive(Debug, Clone)]
enum Op {
    Spawn,
    AddPos(usize),
    AddVel(usize),
    AddTag(usize),
    RemovePos(usize),
    RemoveVel(usize),
    Destroy(usize),
    Update,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Spawn),
        (0..32usize).prop_map(Op::AddPos),
        (0..32usize).prop_map(Op::AddVel),
        (0..32usize).prop_map(Op::AddTag),
        (0..32usize).prop_map(Op::RemovePos),
        (0..32usize).prop_map(Op::RemoveVel),
        (0..32usize).prop_map(Op::Destroy),
        Just(Op::Update),
    ]
}

fn expected(scene: &Scene, keys: &[ComponentKey]) -> HashSet<Entity> {
    scene
        .entities()
        .iter()
        .copied()
        .filter(|e| keys.iter().all(|k| scene.world().has_key(*e, k)))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn caches_match_conjunctive_filters(ops in prop::collection::vec(op_strategy(), 1..80)) {
        let mut scene = Scene::new("prop");
        let filters: Vec<(&str, Vec<ComponentKey>)> = vec![
            ("pos", <(Pos,)>::keys()),
            ("pos_vel", <(Pos, Vel)>::keys()),
            ("vel_tag", <(Vel, Tag)>::keys()),
        ];
        for (name, keys) in &filters {
            scene.register_system(Filtered { base: SystemBase::new(*name, keys.clone()) });
        }

        let mut handles: Vec<Entity> = Vec::new();
        let pick = |handles: &Vec<Entity>, i: usize| {
            if handles.is_empty() { None } else { Some(handles[i % handles.len()]) }
        };

        for op in ops {
            match op {
                Op::Spawn => handles.push(scene.enroll_entity()),
                Op::AddPos(i) => if let Some(e) = pick(&handles, i) { scene.add_component(e, Pos(i as i32)); },
                Op::AddVel(i) => if let Some(e) = pick(&handles, i) { scene.add_component(e, Vel(i as i32)); },
                Op::AddTag(i) => if let Some(e) = pick(&handles, i) { scene.add_component(e, Tag); },
                Op::RemovePos(i) => if let Some(e) = pick(&handles, i) { scene.remove_component::<Pos>(e); },
                Op::RemoveVel(i) => if let Some(e) = pick(&handles, i) { scene.remove_component::<Vel>(e); },
                Op::Destroy(i) => if let Some(e) = pick(&handles, i) { scene.destroy_entity(e); },
                Op::Update => scene.on_update(0.016),
            }

            for (name, keys) in &filters {
                let system = scene.system(name).unwrap();
                let cached: HashSet<Entity> = system.base().entities().iter().copied().collect();
                prop_assert_eq!(cached.len(), system.base().len(), "cache holds duplicates");
                prop_assert_eq!(&cached, &expected(&scene, keys), "system {} diverged", name);
            }
        }
    }

    #[test]
    fn second_add_never_replaces(first in any::<i32>(), second in any::<i32>()) {
        let mut scene = Scene::new("prop");
        let e = scene.enroll_entity();
        scene.add_component(e, Pos(first));
        let returned = scene.add_component(e, Pos(second)).cloned();
        prop_assert_eq!(returned, Some(Pos(first)));
        prop_assert_eq!(scene.get_component::<Pos>(e), Some(&Pos(first)));
    }
}
