use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use engine::{
    Direction, Engine, EngineConfig, EngineError, EntityId, NetId, Snapshot, TickMetricsSnapshot,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::arena;
use super::auth::UserId;
use super::config::ServerConfig;
use super::protocol::{decode_client_message, ProtocolError};

pub(crate) type RoomId = String;

#[derive(Debug, Error)]
pub(crate) enum RoomError {
    #[error("room '{0}' does not exist")]
    UnknownRoom(RoomId),
    #[error("user '{user}' is not in room '{room}'")]
    NotSubscribed { room: RoomId, user: UserId },
    #[error("room '{0}' has no active scene")]
    NoActiveScene(RoomId),
    #[error("join is only valid as the first message of a session")]
    UnexpectedJoin,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("failed to start room engine: {0}")]
    Engine(#[from] EngineError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RoomSettings {
    pub(crate) engine: EngineConfig,
    pub(crate) reap_empty_rooms: bool,
    pub(crate) seed: Option<u64>,
}

impl RoomSettings {
    pub(crate) fn from_config(config: &ServerConfig) -> Self {
        Self {
            engine: config.engine_config(),
            reap_empty_rooms: config.reap_empty_rooms,
            seed: config.seed,
        }
    }
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

/// One arena simulation with the players subscribed to it.
pub(crate) struct Room {
    id: RoomId,
    engine: Engine,
    rng: ChaCha8Rng,
    players: BTreeMap<UserId, EntityId>,
}

impl Room {
    fn create(id: RoomId, settings: &RoomSettings) -> Result<Self, RoomError> {
        let seed = settings.seed.unwrap_or_else(rand::random::<u64>);
        let mut engine = Engine::new(settings.engine);
        engine
            .director_mut()
            .add_scene(arena::ARENA_SCENE, arena::build_scene())
            .map_err(EngineError::from)?;
        engine.go_to_scene(arena::ARENA_SCENE, None)?;
        engine.start()?;
        info!(room = %id, seed, "room_created");
        Ok(Self {
            id,
            engine,
            rng: ChaCha8Rng::seed_from_u64(seed),
            players: BTreeMap::new(),
        })
    }

    pub(crate) fn player_count(&self) -> usize {
        self.players.len()
    }

    pub(crate) fn latest_snapshot(&self) -> Arc<Snapshot> {
        self.engine.latest_snapshot()
    }

    /// Spawns an actor for `user` on a random pad. Joining twice returns
    /// the existing actor.
    pub(crate) fn join(&mut self, user: &UserId) -> Result<NetId, RoomError> {
        if let Some(entity) = self.players.get(user).copied() {
            if let Some(net_id) = self.net_id_of(entity) {
                return Ok(net_id);
            }
        }

        let pad = arena::SPAWN_PADS[self.rng.random_range(0..arena::SPAWN_PADS.len())];
        let world = self
            .engine
            .current_world_mut()
            .ok_or_else(|| RoomError::NoActiveScene(self.id.clone()))?;
        let entity = world.add(arena::player_entity(pad));
        let net_id = world
            .get(entity)
            .map(|actor| actor.net_id().clone())
            .ok_or_else(|| RoomError::NoActiveScene(self.id.clone()))?;
        self.players.insert(user.clone(), entity);
        info!(
            room = %self.id,
            user = %user,
            net_id = %net_id,
            x = pad.x,
            y = pad.y,
            "player_joined"
        );
        Ok(net_id)
    }

    pub(crate) fn leave(&mut self, user: &UserId) -> bool {
        let Some(entity) = self.players.remove(user) else {
            return false;
        };
        if let Some(world) = self.engine.current_world_mut() {
            world.remove(entity);
        }
        info!(room = %self.id, user = %user, "player_left");
        true
    }

    pub(crate) fn set_held(
        &mut self,
        user: &UserId,
        direction: Direction,
        is_down: bool,
    ) -> Result<(), RoomError> {
        let entity = self
            .players
            .get(user)
            .copied()
            .ok_or_else(|| RoomError::NotSubscribed {
                room: self.id.clone(),
                user: user.clone(),
            })?;
        let movement = self
            .engine
            .current_world_mut()
            .and_then(|world| world.get_mut(entity))
            .and_then(|actor| actor.movement.as_mut())
            .ok_or_else(|| RoomError::NoActiveScene(self.id.clone()))?;
        movement.held.set(direction, is_down);
        Ok(())
    }

    /// Runs the ticks owed for `elapsed` and returns one snapshot per tick,
    /// oldest first.
    pub(crate) fn advance(&mut self, elapsed: Duration) -> Vec<Arc<Snapshot>> {
        self.engine.advance(elapsed);
        self.engine.tick_snapshots().to_vec()
    }

    pub(crate) fn metrics(&self) -> TickMetricsSnapshot {
        self.engine.metrics().snapshot()
    }

    fn net_id_of(&self, entity: EntityId) -> Option<NetId> {
        self.engine
            .current_world()
            .and_then(|world| world.get(entity))
            .map(|actor| actor.net_id().clone())
    }
}

/// Registry of live rooms. Each room owns its own engine and sits behind its
/// own lock; the registry lock is held only to look up or create a room.
pub(crate) struct RoomManager {
    rooms: Mutex<HashMap<RoomId, Arc<Mutex<Room>>>>,
    settings: RoomSettings,
    poison_warned: AtomicBool,
}

impl RoomManager {
    pub(crate) fn new(settings: RoomSettings) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            settings,
            poison_warned: AtomicBool::new(false),
        }
    }

    pub(crate) fn room_count(&self) -> usize {
        self.lock_registry().len()
    }

    pub(crate) fn room(&self, room_id: &str) -> Option<Arc<Mutex<Room>>> {
        self.lock_registry().get(room_id).cloned()
    }

    /// Gets or creates `room_id` and spawns `user` in it. Creation happens
    /// under the registry lock so concurrent first joins share one engine.
    pub(crate) fn subscribe_user(
        &self,
        room_id: &str,
        user: &UserId,
    ) -> Result<NetId, RoomError> {
        let room = {
            let mut rooms = self.lock_registry();
            match rooms.get(room_id) {
                Some(room) => Arc::clone(room),
                None => {
                    let room = Arc::new(Mutex::new(Room::create(
                        room_id.to_string(),
                        &self.settings,
                    )?));
                    rooms.insert(room_id.to_string(), Arc::clone(&room));
                    room
                }
            }
        };
        let net_id = self.lock_room(&room).join(user)?;
        Ok(net_id)
    }

    pub(crate) fn unsubscribe_user(&self, room_id: &str, user: &UserId) -> bool {
        let mut rooms = self.lock_registry();
        let Some(room) = rooms.get(room_id).cloned() else {
            return false;
        };
        let (removed, now_empty) = {
            let mut room = self.lock_room(&room);
            let removed = room.leave(user);
            (removed, room.player_count() == 0)
        };
        if removed && now_empty && self.settings.reap_empty_rooms {
            rooms.remove(room_id);
            info!(room = room_id, "room_reaped");
        }
        removed
    }

    /// Applies one raw client line for an already subscribed user.
    pub(crate) fn on_message(
        &self,
        room_id: &str,
        user: &UserId,
        bytes: &[u8],
    ) -> Result<(), RoomError> {
        let message = decode_client_message(bytes)?;
        let Some((direction, is_down)) = message.key_change() else {
            return Err(RoomError::UnexpectedJoin);
        };
        let room = self
            .room(room_id)
            .ok_or_else(|| RoomError::UnknownRoom(room_id.to_string()))?;
        self.lock_room(&room).set_held(user, direction, is_down)?;
        debug!(room = room_id, user = %user, ?direction, is_down, "input_applied");
        Ok(())
    }

    /// Advances every room by `elapsed` and returns the per-tick snapshots of
    /// the rooms that ticked, in room id order.
    pub(crate) fn advance_all(&self, elapsed: Duration) -> Vec<(RoomId, Vec<Arc<Snapshot>>)> {
        self.sorted_rooms()
            .into_iter()
            .filter_map(|(id, room)| {
                let snapshots = self.lock_room(&room).advance(elapsed);
                (!snapshots.is_empty()).then_some((id, snapshots))
            })
            .collect()
    }

    /// Player count and latest tick metrics of every room, in room id order.
    pub(crate) fn room_metrics(&self) -> Vec<(RoomId, usize, TickMetricsSnapshot)> {
        self.sorted_rooms()
            .into_iter()
            .map(|(id, room)| {
                let room = self.lock_room(&room);
                (id, room.player_count(), room.metrics())
            })
            .collect()
    }

    fn sorted_rooms(&self) -> Vec<(RoomId, Arc<Mutex<Room>>)> {
        let mut rooms = self
            .lock_registry()
            .iter()
            .map(|(id, room)| (id.clone(), Arc::clone(room)))
            .collect::<Vec<_>>();
        rooms.sort_by(|a, b| a.0.cmp(&b.0));
        rooms
    }

    fn lock_registry(&self) -> MutexGuard<'_, HashMap<RoomId, Arc<Mutex<Room>>>> {
        self.rooms.lock().unwrap_or_else(|poisoned| {
            self.warn_poisoned("registry");
            poisoned.into_inner()
        })
    }

    fn lock_room<'a>(&self, room: &'a Mutex<Room>) -> MutexGuard<'a, Room> {
        room.lock().unwrap_or_else(|poisoned| {
            self.warn_poisoned("room");
            poisoned.into_inner()
        })
    }

    fn warn_poisoned(&self, which: &'static str) {
        if !self.poison_warned.swap(true, Ordering::Relaxed) {
            warn!(lock = which, "room_lock_poisoned_recovering");
        }
    }
}
