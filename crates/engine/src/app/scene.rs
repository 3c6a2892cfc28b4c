use std::error::Error as StdError;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use super::clock::StepMode;
use super::timer::{Timer, TimerFired, TimerId, Timers};
use crate::ecs::{World, WorldEvent};
use crate::physics::PhysicsConfig;

pub type HookError = Box<dyn StdError + Send + Sync>;
pub type HookResult = Result<(), HookError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SceneId(u64);

static NEXT_SCENE_ID: AtomicU64 = AtomicU64::new(1);

impl SceneId {
    fn allocate() -> Self {
        SceneId(NEXT_SCENE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scene#{}", self.0)
    }
}

/// Read-only view of the engine handed to scene hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineInfo {
    pub tick: u64,
    pub sim_time: Duration,
    pub step_mode: StepMode,
}

impl Default for EngineInfo {
    fn default() -> Self {
        Self {
            tick: 0,
            sim_time: Duration::ZERO,
            step_mode: StepMode::Variable,
        }
    }
}

pub struct SceneContext<'a> {
    pub world: &'a mut World,
    pub timers: &'a mut Timers,
    pub engine: &'a EngineInfo,
    pub scene_name: &'a str,
}

/// Describes a transition. `current_scene` is the scene that was current
/// when the transition began.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivationContext<'a> {
    pub previous_scene: Option<&'a str>,
    pub next_scene: Option<&'a str>,
    pub current_scene: Option<&'a str>,
    pub data: Option<&'a Value>,
}

/// Optional scene callbacks. Every method defaults to doing nothing.
pub trait SceneHooks: Send {
    fn on_initialize(&mut self, _ctx: &mut SceneContext<'_>) -> HookResult {
        Ok(())
    }

    fn on_activate(
        &mut self,
        _ctx: &mut SceneContext<'_>,
        _activation: &ActivationContext<'_>,
    ) -> HookResult {
        Ok(())
    }

    fn on_deactivate(
        &mut self,
        _ctx: &mut SceneContext<'_>,
        _activation: &ActivationContext<'_>,
    ) -> HookResult {
        Ok(())
    }

    fn on_pre_update(&mut self, _ctx: &mut SceneContext<'_>, _elapsed: Duration) -> HookResult {
        Ok(())
    }

    fn on_post_update(&mut self, _ctx: &mut SceneContext<'_>, _elapsed: Duration) -> HookResult {
        Ok(())
    }

    fn on_timer(&mut self, _ctx: &mut SceneContext<'_>, _fired: &TimerFired) -> HookResult {
        Ok(())
    }

    fn on_collision(&mut self, _ctx: &mut SceneContext<'_>, _event: &WorldEvent) -> HookResult {
        Ok(())
    }
}

/// A scene with no behaviour of its own. Used for the default `root` scene.
#[derive(Debug, Default)]
pub struct BlankScene;

impl SceneHooks for BlankScene {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneEvent {
    Initialize,
    Activate,
    Deactivate,
    PreUpdate,
    PostUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStage {
    Initialize,
    Activate,
    Deactivate,
    PreUpdate,
    PostUpdate,
    Timer,
    Collision,
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleStage::Initialize => "initialize",
            LifecycleStage::Activate => "activate",
            LifecycleStage::Deactivate => "deactivate",
            LifecycleStage::PreUpdate => "pre_update",
            LifecycleStage::PostUpdate => "post_update",
            LifecycleStage::Timer => "timer",
            LifecycleStage::Collision => "collision",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("scene '{scene}' failed during {stage}: {source}")]
    Lifecycle {
        scene: String,
        stage: LifecycleStage,
        #[source]
        source: HookError,
    },
}

impl SceneError {
    pub fn stage(&self) -> LifecycleStage {
        match self {
            SceneError::Lifecycle { stage, .. } => *stage,
        }
    }
}

pub struct Scene {
    id: SceneId,
    name: String,
    hooks: Box<dyn SceneHooks>,
    world: World,
    timers: Timers,
    physics: Option<PhysicsConfig>,
    initialized: bool,
    active: bool,
    warned_uninitialized: bool,
    events: Vec<SceneEvent>,
}

impl fmt::Debug for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scene")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("initialized", &self.initialized)
            .field("active", &self.active)
            .field("entities", &self.world.entity_count())
            .finish()
    }
}

impl Scene {
    pub fn new(hooks: impl SceneHooks + 'static) -> Self {
        Self::with_world(hooks, World::new())
    }

    pub fn with_world(hooks: impl SceneHooks + 'static, mut world: World) -> Self {
        let id = SceneId::allocate();
        world.set_scene(id);
        Self {
            id,
            name: String::from("scene"),
            hooks: Box::new(hooks),
            world,
            timers: Timers::default(),
            physics: None,
            initialized: false,
            active: false,
            warned_uninitialized: false,
            events: Vec::new(),
        }
    }

    pub fn blank() -> Self {
        Self::new(BlankScene)
    }

    /// Overrides the engine-wide physics settings for this scene only.
    pub fn with_physics(mut self, physics: PhysicsConfig) -> Self {
        self.physics = Some(physics);
        self
    }

    pub fn id(&self) -> SceneId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn physics(&self) -> Option<PhysicsConfig> {
        self.physics
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Lifecycle events since the start of the last update.
    pub fn events(&self) -> &[SceneEvent] {
        &self.events
    }

    pub fn add_timer(&mut self, timer: Timer) -> TimerId {
        self.timers.add(timer)
    }

    /// Takes effect at the start of the next update.
    pub fn cancel_timer(&mut self, id: TimerId) -> bool {
        self.timers.cancel(id)
    }

    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    fn parts<'a>(
        &'a mut self,
        engine: &'a EngineInfo,
    ) -> (&'a mut Box<dyn SceneHooks>, SceneContext<'a>) {
        (
            &mut self.hooks,
            SceneContext {
                world: &mut self.world,
                timers: &mut self.timers,
                engine,
                scene_name: &self.name,
            },
        )
    }

    fn lifecycle_error(&self, stage: LifecycleStage, source: HookError) -> SceneError {
        error!(scene = %self.name, stage = %stage, error = %source, "scene_hook_failed");
        SceneError::Lifecycle {
            scene: self.name.clone(),
            stage,
            source,
        }
    }

    /// Runs once. Later calls return `Ok` without doing anything. A failing
    /// hook leaves the scene uninitialized so a later call can retry.
    pub fn initialize(&mut self, engine: &EngineInfo) -> Result<(), SceneError> {
        if self.initialized {
            return Ok(());
        }

        let (hooks, mut ctx) = self.parts(engine);
        if let Err(source) = hooks.on_initialize(&mut ctx) {
            return Err(self.lifecycle_error(LifecycleStage::Initialize, source));
        }

        let entity_count = self.world.initialize_entities();
        self.initialized = true;
        self.warned_uninitialized = false;
        self.events.push(SceneEvent::Initialize);
        info!(scene = %self.name, entity_count, "scene_initialized");
        Ok(())
    }

    pub fn activate(
        &mut self,
        engine: &EngineInfo,
        activation: &ActivationContext<'_>,
    ) -> Result<(), SceneError> {
        let (hooks, mut ctx) = self.parts(engine);
        if let Err(source) = hooks.on_activate(&mut ctx, activation) {
            return Err(self.lifecycle_error(LifecycleStage::Activate, source));
        }
        self.active = true;
        self.events.push(SceneEvent::Activate);
        info!(scene = %self.name, previous = ?activation.previous_scene, "scene_activated");
        Ok(())
    }

    pub fn deactivate(
        &mut self,
        engine: &EngineInfo,
        activation: &ActivationContext<'_>,
    ) -> Result<(), SceneError> {
        let (hooks, mut ctx) = self.parts(engine);
        if let Err(source) = hooks.on_deactivate(&mut ctx, activation) {
            return Err(self.lifecycle_error(LifecycleStage::Deactivate, source));
        }
        self.active = false;
        self.events.push(SceneEvent::Deactivate);
        info!(scene = %self.name, next = ?activation.next_scene, "scene_deactivated");
        Ok(())
    }

    /// One simulation step: pre-update hook, timers, world systems,
    /// collision observers, post-update hook.
    pub fn update(
        &mut self,
        engine: &EngineInfo,
        elapsed: Duration,
        default_physics: PhysicsConfig,
    ) -> Result<(), SceneError> {
        if !self.initialized {
            if !self.warned_uninitialized {
                warn!(scene = %self.name, "scene_update_before_initialize");
                self.warned_uninitialized = true;
            }
            return Ok(());
        }

        self.events.clear();
        let physics = self.physics.unwrap_or(default_physics);

        let (hooks, mut ctx) = self.parts(engine);
        if let Err(source) = hooks.on_pre_update(&mut ctx, elapsed) {
            return Err(self.lifecycle_error(LifecycleStage::PreUpdate, source));
        }
        self.events.push(SceneEvent::PreUpdate);

        self.timers.flush_cancellations();
        let fired = self.timers.advance(elapsed);
        for timer in &fired {
            let (hooks, mut ctx) = self.parts(engine);
            if let Err(source) = hooks.on_timer(&mut ctx, timer) {
                return Err(self.lifecycle_error(LifecycleStage::Timer, source));
            }
        }

        self.world.update(elapsed, engine.tick, physics);

        let world_events = self.world.take_events();
        for event in &world_events {
            let (hooks, mut ctx) = self.parts(engine);
            if let Err(source) = hooks.on_collision(&mut ctx, event) {
                return Err(self.lifecycle_error(LifecycleStage::Collision, source));
            }
        }

        let (hooks, mut ctx) = self.parts(engine);
        if let Err(source) = hooks.on_post_update(&mut ctx, elapsed) {
            return Err(self.lifecycle_error(LifecycleStage::PostUpdate, source));
        }
        self.events.push(SceneEvent::PostUpdate);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::ecs::{Entity, Vec2};

    #[derive(Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<String>>>,
        fail_initialize: bool,
    }

    impl Recorder {
        fn push(&self, call: impl Into<String>) {
            self.calls.lock().expect("calls lock").push(call.into());
        }
    }

    impl SceneHooks for Recorder {
        fn on_initialize(&mut self, _ctx: &mut SceneContext<'_>) -> HookResult {
            self.push("initialize");
            if self.fail_initialize {
                return Err("no map".into());
            }
            Ok(())
        }

        fn on_pre_update(&mut self, _ctx: &mut SceneContext<'_>, _elapsed: Duration) -> HookResult {
            self.push("pre");
            Ok(())
        }

        fn on_timer(&mut self, ctx: &mut SceneContext<'_>, fired: &TimerFired) -> HookResult {
            self.push(format!("timer:{}", fired.signal));
            ctx.world.add(Entity::new(Vec2::ZERO));
            Ok(())
        }

        fn on_post_update(
            &mut self,
            _ctx: &mut SceneContext<'_>,
            _elapsed: Duration,
        ) -> HookResult {
            self.push("post");
            Ok(())
        }
    }

    const STEP: Duration = Duration::from_millis(10);

    #[test]
    fn initialize_runs_once() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut scene = Scene::new(Recorder {
            calls: Arc::clone(&calls),
            fail_initialize: false,
        });
        let engine = EngineInfo::default();

        scene.initialize(&engine).expect("first");
        scene.initialize(&engine).expect("second");

        assert_eq!(*calls.lock().expect("calls"), vec!["initialize"]);
        assert_eq!(scene.events(), &[SceneEvent::Initialize]);
    }

    #[test]
    fn initialize_marks_existing_entities() {
        let mut scene = Scene::blank();
        let id = scene.world_mut().add(Entity::new(Vec2::ZERO));
        assert_eq!(
            scene.world().get(id).expect("entity").scene(),
            Some(scene.id())
        );

        scene.initialize(&EngineInfo::default()).expect("initialize");
        assert!(scene.world().get(id).expect("entity").is_initialized());
    }

    #[test]
    fn failed_initialize_can_be_retried() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut scene = Scene::new(Recorder {
            calls: Arc::clone(&calls),
            fail_initialize: true,
        });
        scene.set_name("broken");

        let error = scene
            .initialize(&EngineInfo::default())
            .expect_err("hook fails");
        assert_eq!(error.stage(), LifecycleStage::Initialize);
        assert!(error.to_string().contains("broken"));
        assert!(!scene.is_initialized());

        assert!(scene.initialize(&EngineInfo::default()).is_err());
        assert_eq!(calls.lock().expect("calls").len(), 2);
    }

    #[test]
    fn update_before_initialize_is_a_no_op() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut scene = Scene::new(Recorder {
            calls: Arc::clone(&calls),
            fail_initialize: false,
        });

        scene
            .update(&EngineInfo::default(), STEP, PhysicsConfig::default())
            .expect("no-op");
        assert!(calls.lock().expect("calls").is_empty());
    }

    #[test]
    fn update_runs_hooks_timers_and_world_in_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut scene = Scene::new(Recorder {
            calls: Arc::clone(&calls),
            fail_initialize: false,
        });
        let engine = EngineInfo::default();
        scene.initialize(&engine).expect("initialize");
        scene.add_timer(Timer::once(STEP, "spawn"));

        scene
            .update(&engine, STEP, PhysicsConfig::default())
            .expect("update");

        assert_eq!(
            *calls.lock().expect("calls"),
            vec!["initialize", "pre", "timer:spawn", "post"]
        );
        assert_eq!(scene.events(), &[SceneEvent::PreUpdate, SceneEvent::PostUpdate]);
        assert_eq!(scene.world().entity_count(), 1);
    }

    #[test]
    fn cancelled_timer_does_not_fire_on_next_update() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut scene = Scene::new(Recorder {
            calls: Arc::clone(&calls),
            fail_initialize: false,
        });
        let engine = EngineInfo::default();
        scene.initialize(&engine).expect("initialize");
        let id = scene.add_timer(Timer::once(STEP, "spawn"));
        assert!(scene.cancel_timer(id));

        scene
            .update(&engine, STEP, PhysicsConfig::default())
            .expect("update");

        assert!(!calls
            .lock()
            .expect("calls")
            .iter()
            .any(|call| call.starts_with("timer")));
    }
}
