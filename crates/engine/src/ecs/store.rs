use std::collections::BTreeMap;

use tracing::debug;

use super::entity::{Entity, EntityId};
use crate::app::SceneId;

/// Entities owned by one world, iterated in ascending id order.
///
/// While systems are running, additions and removals of initialized entities
/// are deferred to the next safe point so no system ever observes a
/// half-removed entity.
#[derive(Debug, Default)]
pub struct EntityStore {
    scene: Option<SceneId>,
    entities: BTreeMap<EntityId, Entity>,
    pending_adds: Vec<Entity>,
    pending_removals: Vec<EntityId>,
    updating: bool,
}

impl EntityStore {
    pub fn add(&mut self, mut entity: Entity) -> EntityId {
        let id = entity.id();
        entity.set_scene(self.scene);
        if self.updating {
            self.pending_adds.push(entity);
        } else {
            self.entities.insert(id, entity);
        }
        id
    }

    /// Detaches now if the entity was never initialized or no update is in
    /// progress. Otherwise the entity is killed immediately and detached at
    /// the start of the next update.
    pub fn remove(&mut self, id: EntityId) -> bool {
        if let Some(index) = self.pending_adds.iter().position(|entity| entity.id() == id) {
            self.pending_adds.remove(index);
            return true;
        }

        let Some(entity) = self.entities.get_mut(&id) else {
            return false;
        };

        if !self.updating || !entity.is_initialized() {
            self.entities.remove(&id);
            return true;
        }

        if entity.is_active() {
            entity.kill();
            self.pending_removals.push(id);
        }
        true
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.values_mut()
    }

    /// Live (not killed) entities in ascending id order.
    pub fn live(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values().filter(|entity| entity.is_active())
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.entities.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending_adds.len() + self.pending_removals.len()
    }

    pub(crate) fn set_scene(&mut self, scene: Option<SceneId>) {
        self.scene = scene;
        for entity in self.entities.values_mut() {
            entity.set_scene(scene);
        }
        for entity in &mut self.pending_adds {
            entity.set_scene(scene);
        }
    }

    pub(crate) fn begin_update(&mut self) {
        self.updating = true;
    }

    pub(crate) fn end_update(&mut self) {
        self.updating = false;
    }

    pub(crate) fn apply_pending(&mut self) {
        if !self.pending_removals.is_empty() {
            self.pending_removals.sort();
            self.pending_removals.dedup();
            for id in self.pending_removals.drain(..) {
                self.entities.remove(&id);
            }
        }

        for entity in self.pending_adds.drain(..) {
            self.entities.insert(entity.id(), entity);
        }
    }

    /// Marks every not yet initialized entity as initialized. Returns how
    /// many were touched.
    pub(crate) fn initialize_new(&mut self) -> usize {
        let mut count = 0;
        for entity in self.entities.values_mut() {
            if !entity.is_initialized() {
                entity.mark_initialized();
                count += 1;
            }
        }
        if count > 0 {
            debug!(count, "entities_initialized");
        }
        count
    }

    /// Takes an entity out of the store regardless of update state. Used for
    /// ownership transfer between worlds.
    pub(crate) fn take(&mut self, id: EntityId) -> Option<Entity> {
        if let Some(index) = self.pending_adds.iter().position(|entity| entity.id() == id) {
            return Some(self.pending_adds.remove(index));
        }
        self.pending_removals.retain(|pending| *pending != id);
        self.entities.remove(&id)
    }

    pub(crate) fn sync_visual_positions(&mut self) {
        for entity in self.entities.values_mut() {
            entity.transform.sync_visual();
        }
    }
}
