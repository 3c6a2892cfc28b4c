use std::time::Duration;

use thiserror::Error;

use super::entity::{Entity, EntityId};
use super::store::EntityStore;
use super::system::{System, SystemContext, SystemSchedule};
use crate::app::SceneId;
use crate::physics::{CollisionContact, PhysicsConfig};
use crate::systems::{ActionSystem, CollisionSystem, MotionSystem};

#[derive(Debug, Clone, PartialEq)]
pub enum WorldEvent {
    /// Emitted once per participant, lower id first.
    CollisionStart(CollisionContact),
    CollisionEnd { entity: EntityId, other: EntityId },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorldError {
    #[error("entity {0} is not owned by this world")]
    UnknownEntity(EntityId),
}

#[derive(Debug)]
pub struct World {
    store: EntityStore,
    schedule: SystemSchedule,
    events: Vec<WorldEvent>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// A world with no systems registered.
    pub fn empty() -> Self {
        Self {
            store: EntityStore::default(),
            schedule: SystemSchedule::default(),
            events: Vec::new(),
        }
    }

    /// A world running the built-in action, motion and collision systems.
    pub fn new() -> Self {
        let mut world = Self::empty();
        world.add_system(Box::new(ActionSystem));
        world.add_system(Box::new(MotionSystem));
        world.add_system(Box::new(CollisionSystem::default()));
        world
    }

    pub fn add(&mut self, entity: Entity) -> EntityId {
        self.store.add(entity)
    }

    pub fn remove(&mut self, id: EntityId) -> bool {
        self.store.remove(id)
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.store.get(id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.store.get_mut(id)
    }

    pub fn entities(&self) -> &EntityStore {
        &self.store
    }

    pub fn entities_mut(&mut self) -> &mut EntityStore {
        &mut self.store
    }

    pub fn entity_count(&self) -> usize {
        self.store.len()
    }

    pub fn add_system(&mut self, system: Box<dyn System>) {
        self.schedule.add(system);
    }

    pub fn remove_system(&mut self, name: &str) -> usize {
        self.schedule.remove(name)
    }

    pub fn schedule(&self) -> &SystemSchedule {
        &self.schedule
    }

    /// Events produced by the most recent update.
    pub fn events(&self) -> &[WorldEvent] {
        &self.events
    }

    /// Moves an entity, with its id and components intact, into `other`.
    pub fn transfer(&mut self, id: EntityId, other: &mut World) -> Result<(), WorldError> {
        let entity = self.store.take(id).ok_or(WorldError::UnknownEntity(id))?;
        other.store.add(entity);
        Ok(())
    }

    pub fn update(&mut self, elapsed: Duration, tick: u64, physics: PhysicsConfig) {
        self.events.clear();
        self.store.apply_pending();
        self.store.initialize_new();

        let mut ctx = SystemContext {
            elapsed,
            tick,
            physics,
            events: &mut self.events,
        };
        self.store.begin_update();
        self.schedule.run(&mut self.store, &mut ctx);
        self.store.end_update();

        self.store.sync_visual_positions();
    }

    pub(crate) fn set_scene(&mut self, scene: SceneId) {
        self.store.set_scene(Some(scene));
    }

    pub(crate) fn initialize_entities(&mut self) -> usize {
        self.store.initialize_new()
    }

    pub(crate) fn take_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.events)
    }
}
