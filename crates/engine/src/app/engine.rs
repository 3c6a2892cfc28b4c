use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info};

use super::clock::{Clock, StepMode};
use super::director::{Director, DirectorError, NavigationOutcome};
use super::metrics::{MetricsAccumulator, MetricsHandle};
use super::scene::{EngineInfo, SceneError};
use crate::ecs::World;
use crate::physics::PhysicsConfig;
use crate::snapshot::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Constructed,
    Initialized,
    Running,
    Stopped,
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub step_mode: StepMode,
    /// `None` replays every missed fixed step.
    pub max_catch_up_steps: Option<u32>,
    pub physics: PhysicsConfig,
    /// Wall-clock window between published tick metrics.
    pub metrics_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_mode: StepMode::fixed_hz(60),
            max_catch_up_steps: None,
            physics: PhysicsConfig::default(),
            metrics_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("tick {tick} failed: {source}")]
    Tick {
        tick: u64,
        #[source]
        source: SceneError,
    },
    #[error("tick {tick} panicked: {message}")]
    TickPanicked { tick: u64, message: String },
    #[error("cannot {operation} an engine that is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: EngineState,
    },
    #[error(transparent)]
    Director(#[from] DirectorError),
}

pub type FatalHandler = Box<dyn FnMut(&EngineError) + Send>;

fn log_fatal(error: &EngineError) {
    error!(error = %error, "engine_tick_failed");
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    String::from("non-string panic payload")
}

/// Everything a tick touches, kept apart from the clock so the clock can
/// drive it without a second borrow of the engine.
struct Simulation {
    director: Director,
    tick: u64,
    sim_time: Duration,
    step_mode: StepMode,
    physics: PhysicsConfig,
    latest: Arc<Snapshot>,
    /// Snapshots of the ticks run by the current `advance` call.
    published: Vec<Arc<Snapshot>>,
    metrics: MetricsAccumulator,
    metrics_handle: MetricsHandle,
}

impl Simulation {
    fn info(&self) -> EngineInfo {
        EngineInfo {
            tick: self.tick,
            sim_time: self.sim_time,
            step_mode: self.step_mode,
        }
    }

    fn step(&mut self, step: Duration) -> Result<(), EngineError> {
        let started = Instant::now();
        let tick = self.tick.saturating_add(1);
        let info = EngineInfo {
            tick,
            sim_time: self.sim_time.saturating_add(step),
            step_mode: self.step_mode,
        };
        let physics = self.physics;

        let director = &mut self.director;
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            director.update(&info, step, physics)
        }));

        self.tick = tick;
        self.sim_time = info.sim_time;
        self.capture_snapshot();
        self.published.push(Arc::clone(&self.latest));
        self.metrics.record_tick(started.elapsed());

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(EngineError::Tick { tick, source }),
            Err(payload) => Err(EngineError::TickPanicked {
                tick,
                message: panic_message(payload),
            }),
        }
    }

    fn capture_snapshot(&mut self) {
        let snapshot = match self.director.current_scene() {
            Some(scene) => Snapshot::capture(self.tick, self.sim_time, scene.world()),
            None => Snapshot {
                tick: self.tick,
                time_ms: self.sim_time.as_millis() as u64,
                state: Vec::new(),
            },
        };
        self.latest = Arc::new(snapshot);
    }

    fn publish_metrics(&mut self, now: Instant) {
        let entity_count = self.latest.state.len();
        if let Some(snapshot) = self.metrics.maybe_snapshot(now, entity_count) {
            debug!(
                tps = snapshot.tps,
                tick_time_ms = snapshot.tick_time_ms,
                ticks_total = snapshot.ticks_total,
                entity_count,
                "tick_metrics"
            );
            self.metrics_handle.publish(snapshot);
        }
    }
}

/// Owns the clock and the director and publishes a snapshot after every tick.
pub struct Engine {
    state: EngineState,
    clock: Clock,
    sim: Simulation,
    on_fatal: FatalHandler,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_director(config, Director::new())
    }

    pub fn with_director(config: EngineConfig, director: Director) -> Self {
        let clock =
            Clock::new(config.step_mode).with_max_catch_up_steps(config.max_catch_up_steps);
        Self {
            state: EngineState::Constructed,
            sim: Simulation {
                director,
                tick: 0,
                sim_time: Duration::ZERO,
                step_mode: clock.mode(),
                physics: config.physics,
                latest: Arc::new(Snapshot::empty()),
                published: Vec::new(),
                metrics: MetricsAccumulator::new(config.metrics_interval),
                metrics_handle: MetricsHandle::default(),
            },
            clock,
            on_fatal: Box::new(log_fatal),
        }
    }

    /// Replaces the handler that receives every error escaping a tick. The
    /// default logs and lets the engine keep ticking.
    pub fn set_fatal_handler<F>(&mut self, handler: F)
    where
        F: FnMut(&EngineError) + Send + 'static,
    {
        self.on_fatal = Box::new(handler);
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn info(&self) -> EngineInfo {
        self.sim.info()
    }

    pub fn tick(&self) -> u64 {
        self.sim.tick
    }

    pub fn sim_time(&self) -> Duration {
        self.sim.sim_time
    }

    pub fn director(&self) -> &Director {
        &self.sim.director
    }

    pub fn director_mut(&mut self) -> &mut Director {
        &mut self.sim.director
    }

    pub fn metrics(&self) -> MetricsHandle {
        self.sim.metrics_handle.clone()
    }

    /// World of the current scene.
    pub fn current_world_mut(&mut self) -> Option<&mut World> {
        self.sim
            .director
            .current_scene_mut()
            .map(|scene| scene.world_mut())
    }

    pub fn current_world(&self) -> Option<&World> {
        self.sim.director.current_scene().map(|scene| scene.world())
    }

    /// Snapshot published by the most recent tick.
    pub fn latest_snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.sim.latest)
    }

    /// Snapshots published by each tick of the most recent
    /// [`Engine::advance`], oldest first. Empty when that call ran no tick.
    pub fn tick_snapshots(&self) -> &[Arc<Snapshot>] {
        &self.sim.published
    }

    /// Initializes the director (performing the first navigation). Calling it
    /// again is a no-op.
    pub fn initialize(&mut self) -> Result<(), EngineError> {
        match self.state {
            EngineState::Disposed => {
                return Err(EngineError::InvalidState {
                    operation: "initialize",
                    state: self.state,
                })
            }
            EngineState::Constructed => {}
            _ => return Ok(()),
        }

        let info = self.sim.info();
        self.sim.director.initialize(&info)?;
        self.state = EngineState::Initialized;
        self.sim.capture_snapshot();
        info!(
            scene = ?self.sim.director.current_scene_name(),
            step_mode = ?self.clock.mode(),
            "engine_initialized"
        );
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), EngineError> {
        match self.state {
            EngineState::Disposed => Err(EngineError::InvalidState {
                operation: "start",
                state: self.state,
            }),
            EngineState::Running => Ok(()),
            EngineState::Constructed => {
                self.initialize()?;
                self.start()
            }
            EngineState::Initialized | EngineState::Stopped => {
                self.clock.start();
                self.state = EngineState::Running;
                info!(tick = self.sim.tick, "engine_started");
                Ok(())
            }
        }
    }

    /// Stops future ticking. An in-flight tick is never rolled back.
    pub fn stop(&mut self) {
        if self.state == EngineState::Running {
            self.clock.stop();
            self.state = EngineState::Stopped;
            info!(tick = self.sim.tick, "engine_stopped");
        }
    }

    pub fn dispose(&mut self) {
        self.stop();
        if self.state != EngineState::Disposed {
            self.state = EngineState::Disposed;
            info!(tick = self.sim.tick, "engine_disposed");
        }
    }

    /// Feeds `elapsed` real time to the clock and runs the resulting ticks.
    /// Returns how many ticks ran.
    pub fn advance(&mut self, elapsed: Duration) -> u32 {
        self.sim.published.clear();
        if self.state != EngineState::Running {
            return 0;
        }
        let Self {
            clock,
            sim,
            on_fatal,
            ..
        } = self;
        let ticks = clock.run(elapsed, |step| sim.step(step), |error| on_fatal(&error));
        sim.publish_metrics(Instant::now());
        ticks
    }

    /// Like [`Engine::advance`] with the elapsed time measured from the
    /// previous call.
    pub fn advance_to(&mut self, now: Instant) -> u32 {
        let elapsed = self.clock.measure(now);
        self.advance(elapsed)
    }

    pub fn go_to_scene(
        &mut self,
        name: &str,
        data: Option<Value>,
    ) -> Result<NavigationOutcome, EngineError> {
        if self.state == EngineState::Disposed {
            return Err(EngineError::InvalidState {
                operation: "navigate",
                state: self.state,
            });
        }
        let info = self.sim.info();
        let outcome = self.sim.director.swap_scene(name, data, &info)?;
        if outcome == NavigationOutcome::Completed {
            self.sim.capture_snapshot();
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::app::scene::{HookResult, Scene, SceneContext, SceneHooks};
    use crate::app::Direction;
    use crate::ecs::{Entity, MovementIntent, Tag, Vec2};
    use crate::physics::{BoxShape, Collider, CollisionGroup, CollisionType};

    const STEP: Duration = Duration::from_millis(10);

    fn config() -> EngineConfig {
        EngineConfig {
            step_mode: StepMode::Fixed { timestep: STEP },
            ..EngineConfig::default()
        }
    }

    enum Failure {
        Error,
        Panic,
    }

    struct Faulty {
        on_tick: u64,
        failure: Failure,
    }

    impl SceneHooks for Faulty {
        fn on_pre_update(&mut self, ctx: &mut SceneContext<'_>, _elapsed: Duration) -> HookResult {
            if ctx.engine.tick != self.on_tick {
                return Ok(());
            }
            match self.failure {
                Failure::Error => Err("bad tick".into()),
                Failure::Panic => panic!("tick exploded"),
            }
        }
    }

    fn engine_with(scene: Scene) -> Engine {
        let mut engine = Engine::new(config());
        engine
            .director_mut()
            .add_scene("arena", scene)
            .expect("add scene");
        engine.go_to_scene("arena", None).expect("defer");
        engine
    }

    #[test]
    fn lifecycle_transitions() {
        let mut engine = Engine::new(config());
        assert_eq!(engine.state(), EngineState::Constructed);
        assert_eq!(engine.advance(STEP), 0);

        engine.start().expect("start");
        assert_eq!(engine.state(), EngineState::Running);
        engine.start().expect("start is idempotent");
        assert_eq!(engine.advance(STEP * 3), 3);

        engine.stop();
        assert_eq!(engine.advance(STEP * 3), 0);
        assert_eq!(engine.tick(), 3);

        engine.dispose();
        assert!(matches!(
            engine.start(),
            Err(EngineError::InvalidState { .. })
        ));
    }

    #[test]
    fn snapshot_reflects_post_resolution_state() {
        let mut arena = Scene::blank();
        let mover = arena.world_mut().add(
            Entity::actor(
                Tag("player"),
                Vec2::new(100.0, 100.0),
                Collider::new(
                    BoxShape::new(24.0, 24.0),
                    CollisionType::Passive,
                    CollisionGroup::ALL,
                ),
            )
            .with_movement(MovementIntent::new(2.0)),
        );
        arena.world_mut().add(Entity::actor(
            Tag("wall"),
            Vec2::new(100.0, 124.0),
            Collider::new(
                BoxShape::new(24.0, 24.0),
                CollisionType::Fixed,
                CollisionGroup::ALL,
            ),
        ));
        let mut engine = engine_with(arena);
        engine.start().expect("start");

        let net_id = {
            let world = engine.current_world_mut().expect("world");
            let entity = world.get_mut(mover).expect("mover");
            entity
                .movement
                .as_mut()
                .expect("movement")
                .held
                .set(Direction::Down, true);
            entity.net_id().as_str().to_string()
        };

        assert_eq!(engine.advance(STEP), 1);
        let snapshot = engine.latest_snapshot();
        assert_eq!(snapshot.tick, 1);
        assert_eq!(snapshot.find(&net_id).expect("mover").y, 100.0);
    }

    #[test]
    fn every_catch_up_tick_publishes_its_own_snapshot() {
        let mut engine = Engine::new(config());
        engine.start().expect("start");

        assert_eq!(engine.advance(STEP * 3), 3);
        let ticks = engine
            .tick_snapshots()
            .iter()
            .map(|snapshot| snapshot.tick)
            .collect::<Vec<_>>();
        assert_eq!(ticks, vec![1, 2, 3]);
        assert!(Arc::ptr_eq(
            &engine.tick_snapshots()[2],
            &engine.latest_snapshot()
        ));

        assert_eq!(engine.advance(STEP / 2), 0);
        assert!(engine.tick_snapshots().is_empty());
    }

    #[test]
    fn metrics_are_published_from_wall_clock_intervals() {
        let mut engine = Engine::new(EngineConfig {
            metrics_interval: Duration::ZERO,
            ..config()
        });
        engine.start().expect("start");

        assert_eq!(engine.metrics().snapshot().ticks_total, 0);
        engine.advance(STEP * 5);
        let metrics = engine.metrics().snapshot();
        assert_eq!(metrics.ticks_total, 5);
        assert!(metrics.tps > 0.0);
    }

    #[test]
    fn tick_errors_reach_the_fatal_handler_and_ticking_continues() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut engine = engine_with(Scene::new(Faulty {
            on_tick: 2,
            failure: Failure::Error,
        }));
        engine.set_fatal_handler(move |error| {
            sink.lock().expect("sink").push(error.to_string());
        });
        engine.start().expect("start");

        assert_eq!(engine.advance(STEP * 4), 4);
        assert_eq!(engine.tick(), 4);
        let seen = seen.lock().expect("seen");
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("tick 2"));
    }

    #[test]
    fn panics_inside_a_tick_are_contained() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut engine = engine_with(Scene::new(Faulty {
            on_tick: 1,
            failure: Failure::Panic,
        }));
        engine.set_fatal_handler(move |error| {
            let panicked = matches!(error, EngineError::TickPanicked { .. });
            sink.lock().expect("sink").push(panicked);
        });
        engine.start().expect("start");

        assert_eq!(engine.advance(STEP * 2), 2);
        assert_eq!(*seen.lock().expect("seen"), vec![true]);
    }

    #[test]
    fn unknown_destination_after_start_is_reported() {
        let mut engine = Engine::new(config());
        engine.start().expect("start");
        assert!(matches!(
            engine.go_to_scene("nowhere", None),
            Err(EngineError::Director(DirectorError::UnknownScene(_)))
        ));
        assert_eq!(engine.director().current_scene_name(), Some("root"));
    }
}
