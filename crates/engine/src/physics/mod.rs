mod collider;
mod contact;

pub use collider::{Aabb, BoxShape, Collider, CollisionGroup, CollisionType};
pub use contact::{contact_side, resolve_position, CollisionContact, Side};

/// Per-scene physics switch. Scenes without their own config use the
/// engine-wide one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicsConfig {
    pub enabled: bool,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}
