use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use uuid::Uuid;

use super::components::{ContactState, Motion, MovementIntent, Transform, Vec2};
use crate::app::SceneId;
use crate::physics::Collider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-wide id source so an entity keeps its id when it moves between
/// worlds.
#[derive(Debug)]
pub(crate) struct EntityIdAllocator {
    next: AtomicU64,
}

impl EntityIdAllocator {
    const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub(crate) fn allocate(&self) -> EntityId {
        EntityId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

static ENTITY_IDS: EntityIdAllocator = EntityIdAllocator::new();

/// Opaque network identity shared with clients. Generated once, never changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NetId(String);

impl NetId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Selects a behaviour variant (for example `"player"` or `"wall"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Tag(pub &'static str);

impl Tag {
    pub fn name(&self) -> &'static str {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct Entity {
    id: EntityId,
    net_id: NetId,
    pub tag: Option<Tag>,
    pub transform: Transform,
    pub motion: Option<Motion>,
    pub movement: Option<MovementIntent>,
    pub contact: ContactState,
    collider: Option<Collider>,
    scene: Option<SceneId>,
    initialized: bool,
    active: bool,
}

impl Entity {
    pub fn new(position: Vec2) -> Self {
        Self {
            id: ENTITY_IDS.allocate(),
            net_id: NetId::generate(),
            tag: None,
            transform: Transform::at(position),
            motion: None,
            movement: None,
            contact: ContactState::default(),
            collider: None,
            scene: None,
            initialized: false,
            active: true,
        }
    }

    /// An entity that takes part in collision. The collider is fixed for the
    /// lifetime of the actor.
    pub fn actor(tag: Tag, position: Vec2, collider: Collider) -> Self {
        let mut entity = Self::new(position);
        entity.tag = Some(tag);
        entity.collider = Some(collider);
        entity
    }

    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tag = Some(tag);
        self
    }

    pub fn with_motion(mut self, motion: Motion) -> Self {
        self.motion = Some(motion);
        self
    }

    pub fn with_movement(mut self, movement: MovementIntent) -> Self {
        self.movement = Some(movement);
        self
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn net_id(&self) -> &NetId {
        &self.net_id
    }

    pub fn collider(&self) -> Option<&Collider> {
        self.collider.as_ref()
    }

    pub fn scene(&self) -> Option<SceneId> {
        self.scene
    }

    pub fn position(&self) -> Vec2 {
        self.transform.position
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// False once the entity has been killed; killed entities are skipped by
    /// every system even before they are detached.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn set_scene(&mut self, scene: Option<SceneId>) {
        self.scene = scene;
    }

    pub(crate) fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    pub(crate) fn kill(&mut self) {
        self.active = false;
    }
}
