mod clock;
mod director;
mod engine;
mod input;
mod metrics;
mod scene;
mod timer;

pub use clock::{Clock, StepMode, TickPlan, DEFAULT_TIMESTEP};
pub use director::{
    Director, DirectorError, NavigationEvent, NavigationListener, NavigationOutcome,
    SceneFactory, DEFAULT_SCENE,
};
pub use engine::{Engine, EngineConfig, EngineError, EngineState, FatalHandler};
pub use input::{Direction, HeldDirections};
pub use metrics::{MetricsHandle, TickMetricsSnapshot};
pub use scene::{
    ActivationContext, BlankScene, EngineInfo, HookError, HookResult, LifecycleStage, Scene,
    SceneContext, SceneError, SceneEvent, SceneHooks, SceneId,
};
pub use timer::{Repeat, Timer, TimerFired, TimerId, Timers};
