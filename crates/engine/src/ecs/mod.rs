mod components;
mod entity;
mod store;
mod system;
mod world;

pub use components::{ContactState, Motion, MovementIntent, Transform, Vec2};
pub use entity::{Entity, EntityId, NetId, Tag};
pub use store::EntityStore;
pub use system::{System, SystemContext, SystemSchedule, SystemType};
pub use world::{World, WorldError, WorldEvent};
