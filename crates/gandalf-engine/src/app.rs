//! Application main loop and the window seam.
//!
//! Each frame the [`Application`] does three things in order:
//!
//! 1. Deliver queued window and engine events to their listeners.
//! 2. Run [`SceneManager::on_update`], which applies any pending scene change
//!    first, then [`SceneManager::on_gui_update`].
//! 3. Deliver events raised during the update (scene and system state
//!    changes).
//!
//! A [`Event::WindowClose`] or a callback returning [`ControlFlow::Exit`] ends
//! the loop.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use gandalf_ecs::prelude::*;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::event::{Event, EventKind, EventManager, EventSender};

/// Whether the main loop keeps going after a frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ControlFlow {
    #[default]
    Continue,
    Exit,
}

/// Opaque platform window handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub u64);

pub trait Window {
    /// Open the window. Events it observes are queued through `events`.
    fn create(config: &EngineConfig, events: EventSender) -> Result<Self, EngineError>
    where
        Self: Sized;

    /// Block, calling `frame` with the frame time step in seconds until it
    /// returns [`ControlFlow::Exit`] or the window closes.
    fn dispatch_main_loop(&mut self, frame: &mut dyn FnMut(f32) -> ControlFlow);

    fn handle(&self) -> WindowHandle;

    /// Size in physical pixels.
    fn size(&self) -> (u32, u32);
}

// ---------------------------------------------------------------------------
// HeadlessWindow
// ---------------------------------------------------------------------------

/// A window that never opens: it runs a fixed number of frames at a fixed
/// time step and replays scripted events before chosen frames.
#[derive(Debug)]
pub struct HeadlessWindow {
    size: (u32, u32),
    frames: u32,
    fixed_dt: f32,
    script: BTreeMap<u32, Vec<Event>>,
    events: EventSender,
    frames_run: u32,
}

impl HeadlessWindow {
    pub const FIXED_DT: f32 = 1.0 / 60.0;

    /// Queue `event` just before frame `frame` (zero based) runs.
    pub fn script(&mut self, frame: u32, event: Event) -> &mut Self {
        self.script.entry(frame).or_default().push(event);
        self
    }

    pub fn frames_run(&self) -> u32 {
        self.frames_run
    }
}

impl Window for HeadlessWindow {
    fn create(config: &EngineConfig, events: EventSender) -> Result<Self, EngineError> {
        tracing::info!(frames = config.headless_frames, "headless window created");
        Ok(Self {
            size: (config.width, config.height),
            frames: config.headless_frames,
            fixed_dt: Self::FIXED_DT,
            script: BTreeMap::new(),
            events,
            frames_run: 0,
        })
    }

    fn dispatch_main_loop(&mut self, frame: &mut dyn FnMut(f32) -> ControlFlow) {
        while self.frames_run < self.frames {
            for event in self.script.remove(&self.frames_run).unwrap_or_default() {
                if let Event::WindowResize { width, height } = event {
                    self.size = (width, height);
                }
                self.events.send(event);
            }
            self.frames_run += 1;
            if frame(self.fixed_dt) == ControlFlow::Exit {
                break;
            }
        }
    }

    fn handle(&self) -> WindowHandle {
        WindowHandle(0)
    }

    fn size(&self) -> (u32, u32) {
        self.size
    }
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// Timing of the most recent run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunStats {
    pub frames: u64,
    pub total_time: Duration,
    pub slowest_frame: Duration,
}

pub struct Application<W: Window> {
    config: EngineConfig,
    window: W,
    scenes: SceneManager,
    events: EventManager,
    close_requested: Rc<Cell<bool>>,
    stats: RunStats,
}

impl<W: Window> Application<W> {
    /// Validate `config`, open the window and wire scene-change and close
    /// events.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let mut events = EventManager::new();
        let window = W::create(&config, events.sender())?;

        let mut scenes = SceneManager::new();
        events.connect_scene_manager(&mut scenes);
        let close_requested = Rc::new(Cell::new(false));
        let flag = close_requested.clone();
        events.attach(EventKind::WindowClose, move |_| flag.set(true));

        Ok(Self {
            config,
            window,
            scenes,
            events,
            close_requested,
            stats: RunStats::default(),
        })
    }

    /// Create, let `setup` populate scenes and listeners, then run. Fatal
    /// start-up errors are logged and end the process.
    pub fn run_or_exit(config: EngineConfig, setup: impl FnOnce(&mut Self) -> Result<(), EngineError>) -> Self {
        let result = Self::new(config).and_then(|mut app| {
            setup(&mut app)?;
            app.run();
            Ok(app)
        });
        match result {
            Ok(app) => app,
            Err(err) => {
                tracing::error!(%err, "fatal start-up error");
                std::process::exit(1);
            }
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn window(&self) -> &W {
        &self.window
    }

    pub fn window_mut(&mut self) -> &mut W {
        &mut self.window
    }

    pub fn scenes(&self) -> &SceneManager {
        &self.scenes
    }

    pub fn scenes_mut(&mut self) -> &mut SceneManager {
        &mut self.scenes
    }

    pub fn events(&self) -> &EventManager {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventManager {
        &mut self.events
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Start the active scene and run the window's main loop to completion.
    pub fn run(&mut self) {
        let Self {
            window,
            scenes,
            events,
            close_requested,
            stats,
            ..
        } = self;
        *stats = RunStats::default();
        scenes.on_create();
        events.dispatch_pending();
        let started = Instant::now();

        window.dispatch_main_loop(&mut |ts| {
            let frame_start = Instant::now();
            events.dispatch_pending();
            if close_requested.get() {
                return ControlFlow::Exit;
            }
            scenes.on_update(ts);
            scenes.on_gui_update();
            events.dispatch_pending();

            stats.frames += 1;
            stats.slowest_frame = stats.slowest_frame.max(frame_start.elapsed());
            if close_requested.get() {
                ControlFlow::Exit
            } else {
                ControlFlow::Continue
            }
        });

        stats.total_time = started.elapsed();
        tracing::info!(
            frames = stats.frames,
            total_ms = stats.total_time.as_secs_f64() * 1000.0,
            slowest_ms = stats.slowest_frame.as_secs_f64() * 1000.0,
            "main loop finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn config(frames: u32) -> EngineConfig {
        EngineConfig {
            headless_frames: frames,
            ..EngineConfig::default()
        }
    }

    struct Counter {
        base: SystemBase,
        ticks: Rc<Cell<u32>>,
    }

    impl System for Counter {
        fn base(&self) -> &SystemBase {
            &self.base
        }
        fn base_mut(&mut self) -> &mut SystemBase {
            &mut self.base
        }
        fn on_update_system(&mut self, _world: &mut World, _ts: f32) {
            self.ticks.set(self.ticks.get() + 1);
        }
    }

    #[test]
    fn headless_runs_configured_frames() {
        let ticks = Rc::new(Cell::new(0));
        let mut app = Application::<HeadlessWindow>::new(config(5)).unwrap();
        let mut scene = Scene::new("main");
        scene.register_system(Counter {
            base: SystemBase::new("counter", Vec::new()),
            ticks: ticks.clone(),
        });
        app.scenes_mut().add_scene(scene);
        app.run();

        assert_eq!(ticks.get(), 5);
        assert_eq!(app.stats().frames, 5);
        assert_eq!(app.window().frames_run(), 5);
    }

    #[test]
    fn scripted_close_stops_the_loop() {
        let mut app = Application::<HeadlessWindow>::new(config(100)).unwrap();
        app.scenes_mut().add_scene(Scene::new("main"));
        app.window_mut().script(3, Event::WindowClose);
        app.run();
        assert_eq!(app.stats().frames, 3);
    }

    #[test]
    fn scripted_resize_updates_size_and_notifies() {
        let mut app = Application::<HeadlessWindow>::new(config(2)).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        app.events_mut()
            .attach(EventKind::WindowResize, move |e| sink.borrow_mut().push(e.clone()));
        app.window_mut().script(1, Event::WindowResize { width: 800, height: 600 });
        app.run();

        assert_eq!(app.window().size(), (800, 600));
        assert_eq!(*seen.borrow(), vec![Event::WindowResize { width: 800, height: 600 }]);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let bad = EngineConfig {
            width: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            Application::<HeadlessWindow>::new(bad),
            Err(EngineError::Config(_))
        ));
    }
}
