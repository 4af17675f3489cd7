//! Engine events and the [`EventManager`] that routes them.
//!
//! Listeners attach per [`EventKind`]. Events are queued by [`push`] or by an
//! [`EventSender`] and delivered in order by [`dispatch_pending`], once per
//! frame, so listeners never run in the middle of a system update.
//!
//! [`push`]: EventManager::push
//! [`dispatch_pending`]: EventManager::dispatch_pending

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use gandalf_ecs::prelude::*;

/// The closed set of event kinds listeners can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    WindowClose,
    WindowResize,
    WindowFocus,
    MouseButton,
    MouseMotion,
    MouseScroll,
    KeyPress,
    KeyRelease,
    SceneChange,
    SystemStateChange,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::WindowClose,
        EventKind::WindowResize,
        EventKind::WindowFocus,
        EventKind::MouseButton,
        EventKind::MouseMotion,
        EventKind::MouseScroll,
        EventKind::KeyPress,
        EventKind::KeyRelease,
        EventKind::SceneChange,
        EventKind::SystemStateChange,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Other(u16),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    WindowClose,
    /// New size in physical pixels.
    WindowResize { width: u32, height: u32 },
    WindowFocus { focused: bool },
    MouseButton { button: MouseButton, pressed: bool },
    /// Cursor position in window pixels.
    MouseMotion { x: f32, y: f32 },
    MouseScroll { dx: f32, dy: f32 },
    /// Platform key code. `repeat` is set for auto-repeat presses.
    KeyPress { key: u32, repeat: bool },
    KeyRelease { key: u32 },
    SceneChange(SceneChanged),
    SystemStateChange(SystemStateChanged),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::WindowClose => EventKind::WindowClose,
            Event::WindowResize { .. } => EventKind::WindowResize,
            Event::WindowFocus { .. } => EventKind::WindowFocus,
            Event::MouseButton { .. } => EventKind::MouseButton,
            Event::MouseMotion { .. } => EventKind::MouseMotion,
            Event::MouseScroll { .. } => EventKind::MouseScroll,
            Event::KeyPress { .. } => EventKind::KeyPress,
            Event::KeyRelease { .. } => EventKind::KeyRelease,
            Event::SceneChange(_) => EventKind::SceneChange,
            Event::SystemStateChange(_) => EventKind::SystemStateChange,
        }
    }
}

// ---------------------------------------------------------------------------
// EventSender
// ---------------------------------------------------------------------------

/// Cloneable handle that queues events on an [`EventManager`].
#[derive(Debug, Clone, Default)]
pub struct EventSender {
    queue: Rc<RefCell<VecDeque<Event>>>,
}

impl EventSender {
    pub fn send(&self, event: Event) {
        self.queue.borrow_mut().push_back(event);
    }
}

// ---------------------------------------------------------------------------
// EventManager
// ---------------------------------------------------------------------------

/// Handle returned by [`EventManager::attach`], used to detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut(&Event)>;

#[derive(Default)]
pub struct EventManager {
    listeners: HashMap<EventKind, Vec<(ListenerId, Listener)>>,
    sender: EventSender,
    next_id: u64,
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("listeners", &self.listener_count())
            .field("queued", &self.pending())
            .finish()
    }
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `callback` for every event of `kind`, in attach order.
    pub fn attach(&mut self, kind: EventKind, callback: impl FnMut(&Event) + 'static) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.entry(kind).or_default().push((id, Box::new(callback)));
        id
    }

    /// Remove a listener. Returns `false` if it was already gone.
    pub fn detach(&mut self, id: ListenerId) -> bool {
        for listeners in self.listeners.values_mut() {
            if let Some(pos) = listeners.iter().position(|(lid, _)| *lid == id) {
                drop(listeners.remove(pos));
                return true;
            }
        }
        false
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.values().map(Vec::len).sum()
    }

    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Queue `event` for the next [`dispatch_pending`](Self::dispatch_pending).
    pub fn push(&self, event: Event) {
        self.sender.send(event);
    }

    pub fn pending(&self) -> usize {
        self.sender.queue.borrow().len()
    }

    /// Deliver `event` to its listeners now.
    pub fn dispatch(&mut self, event: &Event) {
        let kind = event.kind();
        tracing::trace!(?kind, "dispatching event");
        if let Some(listeners) = self.listeners.get_mut(&kind) {
            for (_, listener) in listeners.iter_mut() {
                listener(event);
            }
        }
    }

    /// Deliver every queued event. Events queued by listeners during the
    /// drain are delivered in the same call. Returns the number delivered.
    pub fn dispatch_pending(&mut self) -> usize {
        let mut delivered = 0;
        loop {
            // The borrow ends before the listeners run, so they may send.
            let next = self.sender.queue.borrow_mut().pop_front();
            let Some(event) = next else {
                break;
            };
            self.dispatch(&event);
            delivered += 1;
        }
        delivered
    }

    /// Forward applied scene changes as [`Event::SceneChange`].
    pub fn connect_scene_manager(&self, manager: &mut SceneManager) {
        let sender = self.sender();
        manager.on_scene_change(move |change| sender.send(Event::SceneChange(*change)));
    }

    /// Forward state changes of the named system in `scene` as
    /// [`Event::SystemStateChange`]. Returns `false` if no such system.
    pub fn connect_system(&self, scene: &mut Scene, system: &str) -> bool {
        let sender = self.sender();
        scene.on_system_state_change(system, move |change| {
            sender.send(Event::SystemStateChange(change.clone()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(manager: &mut EventManager, kind: EventKind) -> Rc<RefCell<Vec<Event>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        manager.attach(kind, move |e| sink.borrow_mut().push(e.clone()));
        seen
    }

    #[test]
    fn events_reach_only_their_kind() {
        let mut manager = EventManager::new();
        let resizes = recorder(&mut manager, EventKind::WindowResize);
        let keys = recorder(&mut manager, EventKind::KeyPress);

        manager.push(Event::WindowResize { width: 640, height: 480 });
        manager.push(Event::MouseMotion { x: 1.0, y: 2.0 });
        assert!(resizes.borrow().is_empty(), "queued events wait for dispatch");
        assert_eq!(manager.dispatch_pending(), 2);

        assert_eq!(*resizes.borrow(), vec![Event::WindowResize { width: 640, height: 480 }]);
        assert!(keys.borrow().is_empty());
        assert_eq!(manager.pending(), 0);
    }

    #[test]
    fn detached_listener_is_not_called() {
        let mut manager = EventManager::new();
        let count = Rc::new(RefCell::new(0));
        let c = count.clone();
        let id = manager.attach(EventKind::WindowClose, move |_| *c.borrow_mut() += 1);

        manager.dispatch(&Event::WindowClose);
        assert!(manager.detach(id));
        assert!(!manager.detach(id));
        manager.dispatch(&Event::WindowClose);
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn listeners_may_send_while_draining() {
        let mut manager = EventManager::new();
        let sender = manager.sender();
        manager.attach(EventKind::KeyPress, move |e| {
            if let Event::KeyPress { key, .. } = e {
                sender.send(Event::KeyRelease { key: *key });
            }
        });
        let releases = recorder(&mut manager, EventKind::KeyRelease);

        manager.push(Event::KeyPress { key: 32, repeat: false });
        assert_eq!(manager.dispatch_pending(), 2);
        assert_eq!(*releases.borrow(), vec![Event::KeyRelease { key: 32 }]);
    }

    #[test]
    fn scene_changes_are_forwarded() {
        let mut events = EventManager::new();
        let seen = recorder(&mut events, EventKind::SceneChange);
        let mut scenes = SceneManager::new();
        let a = scenes.add_scene(Scene::new("a"));
        let b = scenes.add_scene(Scene::new("b"));
        events.connect_scene_manager(&mut scenes);

        scenes.change_scene(b);
        scenes.on_update(0.0);
        events.dispatch_pending();

        assert_eq!(
            *seen.borrow(),
            vec![Event::SceneChange(SceneChanged {
                previous: Some(a),
                current: b,
            })]
        );
    }

    #[test]
    fn every_kind_round_trips_through_event() {
        let samples = [
            Event::WindowClose,
            Event::WindowResize { width: 1, height: 1 },
            Event::WindowFocus { focused: true },
            Event::MouseButton {
                button: MouseButton::Left,
                pressed: true,
            },
            Event::MouseMotion { x: 0.0, y: 0.0 },
            Event::MouseScroll { dx: 0.0, dy: 1.0 },
            Event::KeyPress { key: 1, repeat: false },
            Event::KeyRelease { key: 1 },
        ];
        let kinds: Vec<EventKind> = samples.iter().map(Event::kind).collect();
        assert_eq!(kinds, EventKind::ALL[..8]);
    }
}
