use std::collections::BTreeMap;

use tracing::trace;

use crate::ecs::{EntityId, EntityStore, System, SystemContext, SystemType, WorldEvent};
use crate::physics::{
    contact_side, resolve_position, Aabb, Collider, CollisionContact, CollisionType, Side,
};

type Pair = (EntityId, EntityId);

/// Detects box overlaps, tracks contacts across ticks and snaps movable
/// participants out of the boxes they hit.
///
/// Pairs are keyed `(lower, higher)` and visited in ascending order. All
/// contact ends of a tick are dispatched before any new contact starts.
#[derive(Debug, Default)]
pub struct CollisionSystem {
    active_pairs: BTreeMap<Pair, Side>,
}

struct Candidate {
    id: EntityId,
    collider: Collider,
    aabb: Aabb,
}

impl CollisionSystem {
    pub fn active_contacts(&self) -> usize {
        self.active_pairs.len()
    }

    fn end_pair(&mut self, pair: Pair, store: &mut EntityStore, events: &mut Vec<WorldEvent>) {
        self.active_pairs.remove(&pair);
        let (a, b) = pair;
        for (entity, other) in [(a, b), (b, a)] {
            if let Some(participant) = store.get_mut(entity) {
                participant.contact.clear();
            }
            events.push(WorldEvent::CollisionEnd { entity, other });
        }
        trace!(a = a.0, b = b.0, "collision_end");
    }
}

fn current_box(store: &EntityStore, id: EntityId) -> Option<(Collider, Aabb)> {
    let entity = store.get(id)?;
    let collider = *entity.collider()?;
    Some((collider, collider.aabb(entity.position())))
}

/// Moves `entity` to exact adjacency with `other` if it is allowed to move
/// and the two boxes still strictly overlap.
fn resolve_against(store: &mut EntityStore, entity: EntityId, other: EntityId, side: Side) {
    let (Some((collider, aabb)), Some((_, other_aabb))) =
        (current_box(store, entity), current_box(store, other))
    else {
        return;
    };
    if !collider.collision_type().moves_on_contact() || !aabb.overlaps(&other_aabb) {
        return;
    }
    if let Some(participant) = store.get_mut(entity) {
        participant.transform.position = resolve_position(
            participant.position(),
            collider.shape(),
            &other_aabb,
            side,
        );
    }
}

impl System for CollisionSystem {
    fn system_type(&self) -> SystemType {
        SystemType::Collision
    }

    fn name(&self) -> &'static str {
        "collision"
    }

    fn update(&mut self, store: &mut EntityStore, ctx: &mut SystemContext<'_>) {
        if !ctx.physics.enabled {
            let pairs: Vec<Pair> = self.active_pairs.keys().copied().collect();
            for pair in pairs {
                self.end_pair(pair, store, ctx.events);
            }
            return;
        }

        let candidates: Vec<Candidate> = store
            .live()
            .filter_map(|entity| {
                let collider = *entity.collider()?;
                Some(Candidate {
                    id: entity.id(),
                    collider,
                    aabb: collider.aabb(entity.position()),
                })
            })
            .collect();

        let mut continuing: Vec<(Pair, Side, bool)> = Vec::new();
        let mut starting: Vec<Pair> = Vec::new();
        for (index, a) in candidates.iter().enumerate() {
            for b in &candidates[index + 1..] {
                if a.collider.collision_type() == CollisionType::Fixed
                    && b.collider.collision_type() == CollisionType::Fixed
                {
                    continue;
                }
                if !a.collider.group().can_collide(&b.collider.group()) {
                    continue;
                }

                let pair = (a.id, b.id);
                match self.active_pairs.get(&pair) {
                    Some(side) if a.aabb.touches(&b.aabb) => {
                        continuing.push((pair, *side, a.aabb.overlaps(&b.aabb)));
                    }
                    Some(_) => {}
                    None if a.aabb.overlaps(&b.aabb) => starting.push(pair),
                    None => {}
                }
            }
        }

        let ended: Vec<Pair> = self
            .active_pairs
            .keys()
            .filter(|pair| !continuing.iter().any(|(kept, _, _)| kept == *pair))
            .copied()
            .collect();
        for pair in ended {
            self.end_pair(pair, store, ctx.events);
        }

        for ((a, b), side, overlapping) in continuing {
            if overlapping {
                resolve_against(store, a, b, side);
                resolve_against(store, b, a, side.opposite());
            }
        }

        for (a, b) in starting {
            let (Some((_, a_box)), Some((_, b_box))) = (current_box(store, a), current_box(store, b))
            else {
                continue;
            };
            if !a_box.overlaps(&b_box) {
                continue;
            }

            let contact = CollisionContact {
                side: contact_side(&a_box, &b_box),
                entity: a,
                other: b,
                penetration: a_box.penetration(&b_box),
            };
            let mirrored = contact.mirrored();
            self.active_pairs.insert((a, b), contact.side);

            for view in [contact, mirrored] {
                if let Some(participant) = store.get_mut(view.entity) {
                    participant.contact.record(view.side);
                }
                resolve_against(store, view.entity, view.other, view.side);
                ctx.events.push(WorldEvent::CollisionStart(view));
            }
            trace!(a = a.0, b = b.0, side = ?contact.side, tick = ctx.tick, "collision_start");
        }
    }
}
