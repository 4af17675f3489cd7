//! Owns every [`Scene`] and tracks which one is active.
//!
//! Scene changes are requests: they are recorded immediately but only applied
//! at the start of the next [`SceneManager::on_update`], so the active scene
//! never changes while one of its systems is mid-update. Systems that need to
//! switch scenes hold a cloned [`SceneChanger`].

use std::cell::Cell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::scene::Scene;

/// Index of a scene inside its [`SceneManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SceneId(pub usize);

/// Notification sent to scene-change listeners once a change is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneChanged {
    pub previous: Option<SceneId>,
    pub current: SceneId,
}

/// Cloneable handle for requesting a scene change from anywhere.
#[derive(Debug, Clone, Default)]
pub struct SceneChanger {
    request: Rc<Cell<Option<SceneId>>>,
}

impl SceneChanger {
    pub fn request(&self, scene: SceneId) {
        self.request.set(Some(scene));
    }

    pub fn pending(&self) -> Option<SceneId> {
        self.request.get()
    }
}

#[derive(Default)]
pub struct SceneManager {
    scenes: Vec<Scene>,
    active: Option<SceneId>,
    changer: SceneChanger,
    listeners: Vec<Box<dyn FnMut(&SceneChanged)>>,
}

impl std::fmt::Debug for SceneManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneManager")
            .field("scenes", &self.scenes.len())
            .field("active", &self.active)
            .field("pending", &self.changer.pending())
            .finish()
    }
}

impl SceneManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a scene. The first scene added becomes active.
    pub fn add_scene(&mut self, scene: Scene) -> SceneId {
        let id = SceneId(self.scenes.len());
        tracing::info!(scene = %scene.name(), id = id.0, "scene added");
        self.scenes.push(scene);
        if self.active.is_none() {
            self.active = Some(id);
        }
        id
    }

    pub fn scene_count(&self) -> usize {
        self.scenes.len()
    }

    pub fn scene(&self, id: SceneId) -> Option<&Scene> {
        self.scenes.get(id.0)
    }

    pub fn scene_mut(&mut self, id: SceneId) -> Option<&mut Scene> {
        self.scenes.get_mut(id.0)
    }

    pub fn find_scene(&self, name: &str) -> Option<SceneId> {
        self.scenes
            .iter()
            .position(|s| s.name() == name)
            .map(SceneId)
    }

    pub fn active_scene_id(&self) -> Option<SceneId> {
        self.active
    }

    pub fn active_scene(&self) -> Option<&Scene> {
        self.active.and_then(|id| self.scenes.get(id.0))
    }

    pub fn active_scene_mut(&mut self) -> Option<&mut Scene> {
        self.active.and_then(|id| self.scenes.get_mut(id.0))
    }

    /// Request a switch to `scene`, applied at the start of the next frame.
    pub fn change_scene(&self, scene: SceneId) {
        self.changer.request(scene);
    }

    pub fn changer(&self) -> SceneChanger {
        self.changer.clone()
    }

    pub fn on_scene_change(&mut self, listener: impl FnMut(&SceneChanged) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Apply a pending scene change, if any. Returns whether the active scene
    /// changed.
    fn apply_pending_change(&mut self) -> bool {
        let Some(requested) = self.changer.request.take() else {
            return false;
        };
        if requested.0 >= self.scenes.len() {
            tracing::warn!(id = requested.0, "scene change to unknown scene -- ignored");
            return false;
        }
        if self.active == Some(requested) {
            return false;
        }
        let event = SceneChanged {
            previous: self.active,
            current: requested,
        };
        self.active = Some(requested);
        tracing::info!(
            from = ?event.previous.map(|s| s.0),
            to = requested.0,
            scene = %self.scenes[requested.0].name(),
            "active scene changed"
        );
        for listener in &mut self.listeners {
            listener(&event);
        }
        true
    }

    /// Start the active scene.
    pub fn on_create(&mut self) {
        self.apply_pending_change();
        if let Some(scene) = self.active_scene_mut() {
            scene.on_create();
        }
    }

    /// Run one frame: apply any pending scene change, then update the active
    /// scene.
    pub fn on_update(&mut self, ts: f32) {
        self.apply_pending_change();
        if let Some(scene) = self.active_scene_mut() {
            scene.on_update(ts);
        }
    }

    pub fn on_gui_update(&mut self) {
        if let Some(scene) = self.active_scene_mut() {
            scene.on_gui_update();
        }
    }
}
