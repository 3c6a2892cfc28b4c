use std::time::Duration;

use engine::{
    ActivationContext, BoxShape, Collider, CollisionGroup, CollisionType, Entity, HookResult,
    MovementIntent, Repeat, Scene, SceneContext, SceneHooks, Tag, Timer, TimerFired, TimerId,
    Vec2, WorldEvent,
};
use tracing::{debug, info, trace};

pub(crate) const ARENA_SCENE: &str = "arena";
pub(crate) const PLAYER_TAG: Tag = Tag("player");
pub(crate) const WALL_TAG: Tag = Tag("wall");

pub(crate) const ARENA_WIDTH: f32 = 640.0;
pub(crate) const ARENA_HEIGHT: f32 = 480.0;
const WALL_THICKNESS: f32 = 16.0;

pub(crate) const PLAYER_SIZE: f32 = 24.0;
pub(crate) const PLAYER_SPEED_PER_TICK: f32 = 2.0;

const WALLS: u32 = 0b01;
const PLAYERS: u32 = 0b10;

pub(crate) const SPAWN_PADS: [Vec2; 4] = [
    Vec2 { x: 96.0, y: 96.0 },
    Vec2 { x: 544.0, y: 96.0 },
    Vec2 { x: 96.0, y: 384.0 },
    Vec2 { x: 544.0, y: 384.0 },
];

const STATS_SIGNAL: &str = "arena_stats";
const STATS_INTERVAL: Duration = Duration::from_secs(10);

pub(crate) fn build_scene() -> Scene {
    Scene::new(ArenaScene::default())
}

pub(crate) fn player_entity(position: Vec2) -> Entity {
    Entity::actor(
        PLAYER_TAG,
        position,
        Collider::new(
            BoxShape::new(PLAYER_SIZE, PLAYER_SIZE),
            CollisionType::Passive,
            CollisionGroup::new(PLAYERS, WALLS | PLAYERS),
        ),
    )
    .with_movement(MovementIntent::new(PLAYER_SPEED_PER_TICK))
}

fn wall_entity(center: Vec2, width: f32, height: f32) -> Entity {
    Entity::actor(
        WALL_TAG,
        center,
        Collider::new(
            BoxShape::new(width, height),
            CollisionType::Fixed,
            CollisionGroup::new(WALLS, PLAYERS),
        ),
    )
}

/// Closed rectangle of fixed walls with players moving inside it.
#[derive(Debug, Default)]
struct ArenaScene {
    stats_timer: Option<TimerId>,
}

impl SceneHooks for ArenaScene {
    fn on_initialize(&mut self, ctx: &mut SceneContext<'_>) -> HookResult {
        let half = WALL_THICKNESS / 2.0;
        let walls = [
            (Vec2::new(ARENA_WIDTH / 2.0, half), ARENA_WIDTH, WALL_THICKNESS),
            (
                Vec2::new(ARENA_WIDTH / 2.0, ARENA_HEIGHT - half),
                ARENA_WIDTH,
                WALL_THICKNESS,
            ),
            (Vec2::new(half, ARENA_HEIGHT / 2.0), WALL_THICKNESS, ARENA_HEIGHT),
            (
                Vec2::new(ARENA_WIDTH - half, ARENA_HEIGHT / 2.0),
                WALL_THICKNESS,
                ARENA_HEIGHT,
            ),
        ];
        for (center, width, height) in walls {
            ctx.world.add(wall_entity(center, width, height));
        }
        debug!(scene = ctx.scene_name, walls = walls.len(), "arena_walls_built");
        Ok(())
    }

    fn on_activate(
        &mut self,
        ctx: &mut SceneContext<'_>,
        _activation: &ActivationContext<'_>,
    ) -> HookResult {
        if self.stats_timer.is_none() {
            self.stats_timer = Some(ctx.timers.add(Timer::repeating(
                STATS_INTERVAL,
                Repeat::Forever,
                STATS_SIGNAL,
            )));
        }
        Ok(())
    }

    fn on_deactivate(
        &mut self,
        ctx: &mut SceneContext<'_>,
        _activation: &ActivationContext<'_>,
    ) -> HookResult {
        if let Some(id) = self.stats_timer.take() {
            ctx.timers.cancel(id);
        }
        Ok(())
    }

    fn on_timer(&mut self, ctx: &mut SceneContext<'_>, fired: &TimerFired) -> HookResult {
        if fired.signal == STATS_SIGNAL {
            let players = ctx
                .world
                .entities()
                .live()
                .filter(|entity| entity.tag == Some(PLAYER_TAG))
                .count();
            info!(
                scene = ctx.scene_name,
                tick = ctx.engine.tick,
                players,
                "arena_stats"
            );
        }
        Ok(())
    }

    fn on_collision(&mut self, _ctx: &mut SceneContext<'_>, event: &WorldEvent) -> HookResult {
        if let WorldEvent::CollisionStart(contact) = event {
            trace!(
                entity = %contact.entity,
                other = %contact.other,
                side = ?contact.side,
                "arena_contact"
            );
        }
        Ok(())
    }
}
