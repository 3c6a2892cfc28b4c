pub mod app;
pub mod ecs;
pub mod physics;
pub mod snapshot;
pub mod systems;

pub use app::{
    ActivationContext, BlankScene, Clock, Direction, Director, DirectorError, Engine,
    EngineConfig, EngineError, EngineInfo, EngineState, HeldDirections, HookError, HookResult,
    MetricsHandle, NavigationEvent, NavigationOutcome, Repeat, Scene, SceneContext, SceneError,
    SceneHooks, SceneId, StepMode, TickMetricsSnapshot, Timer, TimerFired, TimerId,
    DEFAULT_SCENE,
};
pub use ecs::{
    ContactState, Entity, EntityId, Motion, MovementIntent, NetId, System, SystemContext,
    SystemType, Tag, Transform, Vec2, World, WorldError, WorldEvent,
};
pub use physics::{
    BoxShape, Collider, CollisionContact, CollisionGroup, CollisionType, PhysicsConfig, Side,
};
pub use snapshot::{EntitySnapshot, Snapshot, SnapshotPosition};
