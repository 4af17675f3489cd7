//! Scene lifecycle tests: pause semantics, deferred scene changes and
//! snapshot round trips through a second scene.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use gandalf_ecs::prelude::*;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Spin {
    degrees: f32,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Spinner {
    base: SystemBase,
    entity_calls: Rc<Cell<u32>>,
}

impl System for Spinner {
    fn base(&self) -> &SystemBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut SystemBase {
        &mut self.base
    }
    fn on_update_entity(&mut self, world: &mut World, ts: f32, entity: Entity) {
        self.entity_calls.set(self.entity_calls.get() + 1);
        if let Some(spin) = world.get_component_mut::<Spin>(entity) {
            spin.degrees += 90.0 * ts;
        }
    }
}

/// Requests a scene change from inside its update and records which scene
/// the manager reported as active at that moment.
struct Switcher {
    base: SystemBase,
    changer: SceneChanger,
    target: SceneId,
    frames: Rc<Cell<u32>>,
}

impl System for Switcher {
    fn base(&self) -> &SystemBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut SystemBase {
        &mut self.base
    }
    fn on_update_system(&mut self, _world: &mut World, _ts: f32) {
        self.frames.set(self.frames.get() + 1);
        self.changer.request(self.target);
    }
}

fn spinning_scene(calls: Rc<Cell<u32>>, count: usize) -> (Scene, Vec<Entity>) {
    let mut scene = Scene::new("spin");
    scene.world_mut().register_component::<Spin>("Spin");
    scene.register_system(Spinner {
        base: SystemBase::with_filter::<(Spin,)>("spinner"),
        entity_calls: calls,
    });
    let entities = (0..count)
        .map(|_| {
            let e = scene.enroll_entity();
            scene.add_component(e, Spin { degrees: 0.0 });
            e
        })
        .collect();
    (scene, entities)
}

// ---------------------------------------------------------------------------
// Pause
// ---------------------------------------------------------------------------

#[test]
fn pause_stops_entity_hooks_and_keeps_cache() {
    let calls = Rc::new(Cell::new(0));
    let (mut scene, entities) = spinning_scene(calls.clone(), 3);

    scene.on_update(1.0);
    assert_eq!(calls.get(), 3);

    let transitions = Rc::new(RefCell::new(Vec::new()));
    let sink = transitions.clone();
    scene.on_system_state_change("spinner", move |ev| sink.borrow_mut().push(ev.current));

    scene.set_system_state("spinner", SystemState::Pause);
    for _ in 0..5 {
        scene.on_update(1.0);
    }
    assert_eq!(calls.get(), 3, "paused system must not run entity hooks");
    assert_eq!(scene.system("spinner").unwrap().base().entities(), &entities[..]);
    assert_eq!(scene.get_component::<Spin>(entities[0]).unwrap().degrees, 90.0);

    scene.set_system_state("spinner", SystemState::Play);
    scene.on_update(1.0);
    assert_eq!(calls.get(), 6);
    assert_eq!(*transitions.borrow(), vec![SystemState::Pause, SystemState::Play]);
}

#[test]
fn entity_added_while_paused_is_created_after_resume() {
    let calls = Rc::new(Cell::new(0));
    let (mut scene, _) = spinning_scene(calls.clone(), 0);
    scene.on_create();
    scene.set_system_state("spinner", SystemState::Pause);

    let e = scene.enroll_entity();
    scene.add_component(e, Spin { degrees: 0.0 });
    scene.on_update(1.0);
    assert_eq!(
        scene.system("spinner").unwrap().base().pending_create(),
        &[e]
    );

    scene.set_system_state("spinner", SystemState::Play);
    scene.on_update(1.0);
    assert!(scene.system("spinner").unwrap().base().pending_create().is_empty());
    assert_eq!(calls.get(), 1);
}

// ---------------------------------------------------------------------------
// Scene manager
// ---------------------------------------------------------------------------

#[test]
fn scene_change_requested_mid_update_applies_next_frame() {
    let mut manager = SceneManager::new();
    let frames = Rc::new(Cell::new(0));

    let first = manager.add_scene(Scene::new("first"));
    let second = manager.add_scene(Scene::new("second"));
    let changer = manager.changer();
    manager
        .scene_mut(first)
        .unwrap()
        .register_system(Switcher {
            base: SystemBase::new("switcher", Vec::new()),
            changer,
            target: second,
            frames: frames.clone(),
        });

    manager.on_create();
    manager.on_update(0.016);
    assert_eq!(frames.get(), 1);
    assert_eq!(manager.active_scene_id(), Some(first));
    assert_eq!(manager.active_scene().unwrap().name(), "first");

    manager.on_update(0.016);
    assert_eq!(manager.active_scene_id(), Some(second));
    assert_eq!(frames.get(), 1, "old scene must not update after the switch");
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[test]
fn snapshot_round_trip_preserves_components() {
    let (mut scene, _) = spinning_scene(Rc::new(Cell::new(0)), 4);
    scene.on_update(0.5);
    let snap = scene.snapshot();

    let (mut copy, _) = spinning_scene(Rc::new(Cell::new(0)), 0);
    let restored = snap.restore_into(&mut copy).unwrap();
    assert_eq!(restored.len(), 4);
    assert_eq!(copy.system("spinner").unwrap().base().len(), 4);

    let resnap = copy.snapshot();
    assert_eq!(resnap.entities, snap.entities.iter().zip(&restored).map(|(e, &h)| {
        EntitySnapshot { entity: h, ..e.clone() }
    }).collect::<Vec<_>>());
}
