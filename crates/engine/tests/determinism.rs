use std::time::Duration;

use engine::{
    BoxShape, Collider, CollisionGroup, CollisionType, Direction, Engine, EngineConfig, Entity,
    EntityId, MovementIntent, Scene, StepMode, Tag, Vec2,
};

const STEP: Duration = Duration::from_millis(16);

fn body(tag: &'static str, x: f32, y: f32, collision_type: CollisionType) -> Entity {
    Entity::actor(
        Tag(tag),
        Vec2::new(x, y),
        Collider::new(
            BoxShape::new(24.0, 24.0),
            collision_type,
            CollisionGroup::ALL,
        ),
    )
}

fn build_engine() -> (Engine, EntityId) {
    let mut scene = Scene::blank();
    let world = scene.world_mut();
    let player = world.add(
        body("player", 40.0, 100.0, CollisionType::Passive)
            .with_movement(MovementIntent::new(2.0)),
    );
    world.add(body("wall", 100.0, 100.0, CollisionType::Fixed));
    world.add(body("wall", 40.0, 140.0, CollisionType::Fixed));

    let mut engine = Engine::new(EngineConfig {
        step_mode: StepMode::Fixed { timestep: STEP },
        ..EngineConfig::default()
    });
    engine
        .director_mut()
        .add_scene("arena", scene)
        .expect("add arena");
    engine.go_to_scene("arena", None).expect("defer arena");
    engine.start().expect("start");
    (engine, player)
}

fn hold(engine: &mut Engine, player: EntityId, direction: Direction, down: bool) {
    engine
        .current_world_mut()
        .and_then(|world| world.get_mut(player))
        .and_then(|entity| entity.movement.as_mut())
        .expect("player movement")
        .held
        .set(direction, down);
}

/// Feeds `total` of wall time in the given chunk pattern, repeating it.
fn feed(engine: &mut Engine, total: Duration, chunks_ms: &[u64]) -> u32 {
    let mut fed = Duration::ZERO;
    let mut ticks = 0;
    for ms in chunks_ms.iter().cycle() {
        if fed >= total {
            break;
        }
        let chunk = Duration::from_millis(*ms).min(total - fed);
        fed += chunk;
        ticks += engine.advance(chunk);
    }
    ticks
}

#[test]
fn identical_inputs_give_identical_state_regardless_of_chunking() {
    let (mut smooth, smooth_player) = build_engine();
    let (mut jittery, jittery_player) = build_engine();

    let phases = [
        (Direction::Right, Duration::from_millis(800)),
        (Direction::Down, Duration::from_millis(640)),
        (Direction::Left, Duration::from_millis(320)),
    ];

    for (direction, span) in phases {
        hold(&mut smooth, smooth_player, direction, true);
        hold(&mut jittery, jittery_player, direction, true);

        let smooth_ticks = feed(&mut smooth, span, &[16]);
        let jittery_ticks = feed(&mut jittery, span, &[5, 31, 2, 50, 8]);
        assert_eq!(smooth_ticks, jittery_ticks);

        hold(&mut smooth, smooth_player, direction, false);
        hold(&mut jittery, jittery_player, direction, false);
    }

    let a = smooth.latest_snapshot();
    let b = jittery.latest_snapshot();
    assert_eq!(a.tick, b.tick);
    assert_eq!(a.state_hash(), b.state_hash());
}

#[test]
fn player_stops_flush_against_the_wall() {
    let (mut engine, player) = build_engine();
    hold(&mut engine, player, Direction::Right, true);
    feed(&mut engine, Duration::from_secs(2), &[16]);

    let world = engine.current_world_mut().expect("world");
    let entity = world.get(player).expect("player");
    assert_eq!(entity.position(), Vec2::new(76.0, 100.0));
    assert!(entity.contact.is_colliding);
}
