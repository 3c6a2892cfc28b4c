use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ecs::World;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPosition {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub x: f32,
    pub y: f32,
    pub position: SnapshotPosition,
}

/// Post-resolution state of every live entity after one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tick: u64,
    pub time_ms: u64,
    pub state: Vec<EntitySnapshot>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            tick: 0,
            time_ms: 0,
            state: Vec::new(),
        }
    }

    pub fn capture(tick: u64, sim_time: Duration, world: &World) -> Self {
        let state = world
            .entities()
            .live()
            .map(|entity| {
                let position = entity.position();
                EntitySnapshot {
                    id: entity.net_id().as_str().to_string(),
                    tag: entity.tag.map(|tag| tag.name().to_string()),
                    x: position.x,
                    y: position.y,
                    position: SnapshotPosition {
                        x: position.x,
                        y: position.y,
                        z: 0.0,
                        w: 1.0,
                    },
                }
            })
            .collect();

        Self {
            tick,
            time_ms: sim_time.as_millis() as u64,
            state,
        }
    }

    pub fn find(&self, id: &str) -> Option<&EntitySnapshot> {
        self.state.iter().find(|entry| entry.id == id)
    }

    /// SHA-256 over tick, tags and exact position bits, in entity order.
    /// Network ids are random per process and are left out so two runs of
    /// the same inputs hash the same.
    pub fn state_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.tick.to_le_bytes());
        for entry in &self.state {
            hasher.update(entry.tag.as_deref().unwrap_or("").as_bytes());
            hasher.update([0u8]);
            hasher.update(entry.x.to_bits().to_le_bytes());
            hasher.update(entry.y.to_bits().to_le_bytes());
        }
        to_hex_lower(&hasher.finalize())
    }
}

fn to_hex_lower(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::{Entity, Tag, Vec2};

    #[test]
    fn capture_skips_killed_entities_and_fills_homogeneous_position() {
        let mut world = World::new();
        let kept = world.add(Entity::new(Vec2::new(3.0, 4.0)).with_tag(Tag("player")));
        let killed = world.add(Entity::new(Vec2::ZERO));
        world.get_mut(killed).expect("entity").kill();

        let snapshot = Snapshot::capture(7, Duration::from_millis(1500), &world);

        assert_eq!(snapshot.tick, 7);
        assert_eq!(snapshot.time_ms, 1500);
        assert_eq!(snapshot.state.len(), 1);
        let entry = &snapshot.state[0];
        assert_eq!(entry.id, world.get(kept).expect("kept").net_id().as_str());
        assert_eq!(entry.tag.as_deref(), Some("player"));
        assert_eq!(
            entry.position,
            SnapshotPosition {
                x: 3.0,
                y: 4.0,
                z: 0.0,
                w: 1.0
            }
        );
    }

    #[test]
    fn hash_ignores_network_ids_but_not_positions() {
        let mut a = World::new();
        let mut b = World::new();
        a.add(Entity::new(Vec2::new(1.0, 2.0)));
        b.add(Entity::new(Vec2::new(1.0, 2.0)));

        let hash_a = Snapshot::capture(1, Duration::ZERO, &a).state_hash();
        let hash_b = Snapshot::capture(1, Duration::ZERO, &b).state_hash();
        assert_eq!(hash_a, hash_b);
        assert_eq!(hash_a.len(), 64);

        b.add(Entity::new(Vec2::new(1.0, 2.5)));
        assert_ne!(hash_a, Snapshot::capture(1, Duration::ZERO, &b).state_hash());
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let snapshot = Snapshot {
            tick: 1,
            time_ms: 16,
            state: Vec::new(),
        };
        let encoded = serde_json::to_string(&snapshot).expect("encode");
        assert_eq!(encoded, r#"{"tick":1,"time_ms":16,"state":[]}"#);
    }
}
